use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pss",
    about = "Persistent store tool: large objects in a store image",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store image to operate on
    #[arg(short, long, global = true, default_value = "store.pss")]
    pub store: PathBuf,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty store image
    Init(InitArgs),
    /// Store a file as a new large object
    Put(PutArgs),
    /// Write a large object's content to a file
    Get(GetArgs),
    /// Describe one large object
    Info(InfoArgs),
    /// List large objects
    Ls(LsArgs),
    /// Delete a large object
    Rm(RmArgs),
    /// Write a backup stream
    Backup(BackupArgs),
    /// Create a large object from a backup stream
    Restore(RestoreArgs),
    /// Copy a large object, optionally into another image
    Dup(DupArgs),
    /// Remove objects left behind by interrupted creations
    Gc(GcArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing image
    #[arg(long)]
    pub force: bool,
    /// Capacity in bytes, overriding the configuration
    #[arg(long)]
    pub capacity: Option<usize>,
}

#[derive(Args)]
pub struct PutArgs {
    pub file: PathBuf,
    #[arg(long)]
    pub compander: Option<String>,
    /// Row width in bytes for pixel-map objects
    #[arg(long)]
    pub row_bytes: Option<u32>,
    #[arg(long)]
    pub read_only: bool,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: u32,
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct InfoArgs {
    pub id: u32,
}

#[derive(Args)]
pub struct LsArgs {
    /// Show size and compander for each object
    #[arg(short, long)]
    pub long: bool,
}

#[derive(Args)]
pub struct RmArgs {
    pub ids: Vec<u32>,
}

#[derive(Args)]
pub struct BackupArgs {
    pub id: u32,
    #[arg(short, long)]
    pub output: PathBuf,
    /// Keep chunks in their stored form
    #[arg(long)]
    pub compressed: bool,
}

#[derive(Args)]
pub struct RestoreArgs {
    pub input: PathBuf,
    /// The stream holds stored chunks rather than plain content
    #[arg(long)]
    pub compressed: bool,
    #[arg(long)]
    pub compander: Option<String>,
    #[arg(long)]
    pub row_bytes: Option<u32>,
    #[arg(long)]
    pub read_only: bool,
}

#[derive(Args)]
pub struct DupArgs {
    pub id: u32,
    /// Destination image; the source image when omitted
    #[arg(long)]
    pub into: Option<PathBuf>,
}

#[derive(Args)]
pub struct GcArgs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["pss", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init(_)));
        assert_eq!(cli.store, PathBuf::from("store.pss"));
    }

    #[test]
    fn parse_global_store() {
        let cli = Cli::try_parse_from(["pss", "ls", "--store", "/tmp/a.pss", "-l"]).unwrap();
        assert_eq!(cli.store, PathBuf::from("/tmp/a.pss"));
        if let Command::Ls(args) = cli.command {
            assert!(args.long);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_put_pixel_map() {
        let cli = Cli::try_parse_from([
            "pss",
            "put",
            "icon.raw",
            "--compander",
            "CPixelMapCompander",
            "--row-bytes",
            "64",
            "--read-only",
        ])
        .unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("icon.raw"));
            assert_eq!(args.compander.as_deref(), Some("CPixelMapCompander"));
            assert_eq!(args.row_bytes, Some(64));
            assert!(args.read_only);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_backup_compressed() {
        let cli = Cli::try_parse_from(["pss", "backup", "7", "-o", "out.bak", "--compressed"]).unwrap();
        if let Command::Backup(args) = cli.command {
            assert_eq!(args.id, 7);
            assert!(args.compressed);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_rm_many() {
        let cli = Cli::try_parse_from(["pss", "rm", "3", "9"]).unwrap();
        if let Command::Rm(args) = cli.command {
            assert_eq!(args.ids, vec![3, 9]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_dup_into() {
        let cli = Cli::try_parse_from(["pss", "dup", "2", "--into", "other.pss"]).unwrap();
        if let Command::Dup(args) = cli.command {
            assert_eq!(args.into, Some(PathBuf::from("other.pss")));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_json_verbose() {
        let cli = Cli::try_parse_from(["pss", "-v", "--format", "json", "gc"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn bad_id_is_rejected() {
        assert!(Cli::try_parse_from(["pss", "info", "seven"]).is_err());
    }
}
