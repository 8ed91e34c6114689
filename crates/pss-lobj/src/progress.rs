/// Snapshot passed to a [`ProgressCallback`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressReport {
    /// Total logical bytes the operation will move.
    pub package_size: usize,
    /// Bytes moved so far.
    pub size_done: usize,
    pub package_name: Option<String>,
    /// One-based index of the chunk being processed.
    pub part_number: usize,
    pub number_of_parts: usize,
}

/// Receives progress from streaming operations.
///
/// Called synchronously on the working thread. Implementations must not
/// touch the store being operated on.
pub trait ProgressCallback {
    fn progress(&mut self, report: &ProgressReport);

    /// Report interval in bytes. Zero defers to the engine's configured
    /// frequency.
    fn frequency(&self) -> usize {
        0
    }
}

impl<F: FnMut(&ProgressReport)> ProgressCallback for F {
    fn progress(&mut self, report: &ProgressReport) {
        self(report)
    }
}

/// Drives a callback at each frequency boundary and once at the end.
pub(crate) struct ProgressTracker<'a> {
    callback: Option<&'a mut dyn ProgressCallback>,
    frequency: usize,
    next_report: usize,
    reported: Option<usize>,
    report: ProgressReport,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(
        callback: Option<&'a mut dyn ProgressCallback>,
        default_frequency: usize,
        package_size: usize,
        number_of_parts: usize,
        package_name: Option<String>,
    ) -> Self {
        let frequency = match callback.as_ref().map(|c| c.frequency()) {
            Some(f) if f > 0 => f,
            _ => default_frequency.max(1),
        };
        Self {
            callback,
            frequency,
            next_report: frequency,
            reported: None,
            report: ProgressReport {
                package_size,
                size_done: 0,
                package_name,
                part_number: 0,
                number_of_parts,
            },
        }
    }

    /// Record `bytes` more done while working on zero-based chunk `part`.
    pub(crate) fn advance(&mut self, part: usize, bytes: usize) {
        self.report.size_done += bytes;
        self.report.part_number = part + 1;
        if self.report.size_done >= self.next_report {
            while self.next_report <= self.report.size_done {
                self.next_report += self.frequency;
            }
            self.emit();
        }
    }

    pub(crate) fn finish(&mut self) {
        if self.reported != Some(self.report.size_done) {
            self.emit();
        }
    }

    fn emit(&mut self) {
        if let Some(callback) = self.callback.as_deref_mut() {
            callback.progress(&self.report);
        }
        self.reported = Some(self.report.size_done);
    }
}
