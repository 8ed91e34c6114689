use std::io::{self, Read, Write};

/// Byte transport for streaming large objects in and out.
///
/// Framed primitives are big-endian. Sizes travel as `u32`.
pub trait Pipe {
    /// Fill `buf` completely or fail.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<()>;

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut raw = [0u8; 4];
        self.read_chunk(&mut raw)?;
        Ok(u32::from_be_bytes(raw))
    }

    fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.write_chunk(&value.to_be_bytes())
    }

    fn read_size(&mut self) -> io::Result<usize> {
        Ok(self.read_u32()? as usize)
    }

    fn write_size(&mut self, size: usize) -> io::Result<()> {
        let size = u32::try_from(size).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("size {size} exceeds u32"))
        })?;
        self.write_u32(size)
    }
}

/// A pipe over an in-memory buffer: writes append, reads consume from the
/// front.
#[derive(Clone, Debug, Default)]
pub struct MemoryPipe {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipe whose reads yield `data`.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Everything written so far, including bytes already read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl Pipe for MemoryPipe {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if buf.len() > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {} bytes, {} left", buf.len(), self.remaining()),
            ));
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// A pipe over any `Read + Write` stream, e.g. a file.
#[derive(Debug)]
pub struct StreamPipe<T> {
    inner: T,
    bytes_read: u64,
    bytes_written: u64,
}

impl<T: Read + Write> StreamPipe<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write> Pipe for StreamPipe<T> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
