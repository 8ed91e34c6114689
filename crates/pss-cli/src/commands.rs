use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use pss_compander::{PixelMapCompander, PIXEL_MAP_COMPANDER};
use pss_lobj::{
    CreateOptions, LargeObjectInfo, LargeObjectStore, Pipe, ProgressCallback, ProgressReport,
    RootFlags, StreamPipe,
};
use pss_mux::MuxStore;
use pss_store::{InMemoryStore, Store, StoreConfig};
use pss_types::PssId;
use tracing::debug;

use crate::cli::*;
use crate::config::CliConfig;

/// Settings shared by every command.
struct Env {
    store_path: PathBuf,
    config: CliConfig,
    lobj: LargeObjectStore,
    format: OutputFormat,
    verbose: bool,
}

/// An opened store image. Changes reach disk only through [`Session::save`].
struct Session {
    path: PathBuf,
    mux: Arc<MuxStore<InMemoryStore>>,
    store: Arc<dyn Store>,
}

impl Session {
    fn open(path: &Path, config: &StoreConfig) -> anyhow::Result<Self> {
        let image = InMemoryStore::open_image(path, config.clone())
            .with_context(|| format!("opening store image {}", path.display()))?;
        let mux = Arc::new(MuxStore::new(image));
        let store: Arc<dyn Store> = mux.clone();
        Ok(Self {
            path: path.to_path_buf(),
            mux,
            store,
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        self.mux
            .inner()
            .save_image(&self.path)
            .with_context(|| format!("saving store image {}", self.path.display()))?;
        debug!(path = %self.path.display(), stats = ?self.mux.stats(), "store image saved");
        Ok(())
    }
}

/// Prints progress to stderr when enabled.
struct ProgressPrinter {
    enabled: bool,
}

impl ProgressCallback for ProgressPrinter {
    fn progress(&mut self, report: &ProgressReport) {
        if self.enabled {
            eprintln!(
                "  {} {}/{} bytes (chunk {}/{})",
                report.package_name.as_deref().unwrap_or("object").dimmed(),
                report.size_done,
                report.package_size,
                report.part_number,
                report.number_of_parts,
            );
        }
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let env = Env {
        store_path: cli.store,
        lobj: LargeObjectStore::new(config.large_object.clone()),
        config,
        format: cli.format,
        verbose: cli.verbose,
    };
    match cli.command {
        Command::Init(args) => cmd_init(&env, args),
        Command::Put(args) => cmd_put(&env, args),
        Command::Get(args) => cmd_get(&env, args),
        Command::Info(args) => cmd_info(&env, args),
        Command::Ls(args) => cmd_ls(&env, args),
        Command::Rm(args) => cmd_rm(&env, args),
        Command::Backup(args) => cmd_backup(&env, args),
        Command::Restore(args) => cmd_restore(&env, args),
        Command::Dup(args) => cmd_dup(&env, args),
        Command::Gc(_) => cmd_gc(&env),
    }
}

impl Env {
    fn session(&self) -> anyhow::Result<Session> {
        Session::open(&self.store_path, &self.config.store)
    }

    fn progress(&self) -> ProgressPrinter {
        ProgressPrinter {
            enabled: self.verbose,
        }
    }
}

/// A row width implies the pixel-map compander unless one is named.
fn compander_options(
    mut opts: CreateOptions,
    compander: Option<String>,
    row_bytes: Option<u32>,
) -> CreateOptions {
    if let Some(row_bytes) = row_bytes {
        opts = opts
            .compander(compander.clone().unwrap_or_else(|| PIXEL_MAP_COMPANDER.to_string()))
            .parameters(PixelMapCompander::parameters(row_bytes));
    }
    if let Some(name) = compander {
        opts = opts.compander(name);
    }
    opts
}

fn cmd_init(env: &Env, args: InitArgs) -> anyhow::Result<()> {
    let path = &env.store_path;
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let mut config = env.config.store.clone();
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    let capacity = config.capacity;
    InMemoryStore::with_config(config)
        .save_image(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!(
        "{} Initialized store image {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    println!("  Capacity: {} bytes", capacity);
    Ok(())
}

fn cmd_put(env: &Env, args: PutArgs) -> anyhow::Result<()> {
    let session = env.session()?;
    let file = File::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let size = usize::try_from(file.metadata()?.len())?;
    let opts = compander_options(
        CreateOptions::new(size)
            .read_only(args.read_only)
            .named(args.file.display().to_string()),
        args.compander,
        args.row_bytes,
    );

    let mut pipe = StreamPipe::new(file);
    let mut progress = env.progress();
    let id = env
        .lobj
        .create(&session.store, Some(&mut pipe), &opts, Some(&mut progress))?;
    session.save()?;

    let info = env.lobj.info(session.store.as_ref(), id)?;
    println!(
        "{} Stored {} as {}",
        "✓".green().bold(),
        args.file.display(),
        id.to_string().yellow()
    );
    println!(
        "  {} bytes in {} bytes of storage ({})",
        info.size,
        info.storage_size,
        info.compander.cyan()
    );
    Ok(())
}

fn cmd_get(env: &Env, args: GetArgs) -> anyhow::Result<()> {
    let session = env.session()?;
    let object = env.lobj.open(&session.store, PssId::new(args.id))?;
    let mut out = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for index in 0..object.chunk_count() {
        out.write_all(&object.read_chunk(index)?)?;
    }
    out.flush()?;
    println!(
        "{} Wrote {} bytes to {}",
        "✓".green().bold(),
        object.len(),
        args.output.display()
    );
    Ok(())
}

fn print_info(info: &LargeObjectInfo) {
    println!("Large object {}", info.id.to_string().yellow().bold());
    println!("  Size: {} bytes in {} chunks", info.size, info.chunks);
    println!("  Stored chunks: {}", info.stored_chunks);
    println!("  Storage: {} bytes", info.storage_size);
    println!("  Compander: {}", info.compander.cyan());
    if info.read_only {
        println!("  {}", "read-only".red());
    }
}

fn cmd_info(env: &Env, args: InfoArgs) -> anyhow::Result<()> {
    let session = env.session()?;
    let info = env.lobj.info(session.store.as_ref(), PssId::new(args.id))?;
    match env.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        OutputFormat::Text => print_info(&info),
    }
    Ok(())
}

fn cmd_ls(env: &Env, args: LsArgs) -> anyhow::Result<()> {
    let session = env.session()?;
    let store = session.store.as_ref();
    let ids = env.lobj.list(store)?;
    match env.format {
        OutputFormat::Json => {
            let infos = ids
                .iter()
                .map(|&id| env.lobj.info(store, id))
                .collect::<Result<Vec<_>, _>>()?;
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
        OutputFormat::Text if ids.is_empty() => println!("No large objects."),
        OutputFormat::Text => {
            for id in ids {
                if args.long {
                    let info = env.lobj.info(store, id)?;
                    let mode = if info.read_only { "r-" } else { "rw" };
                    println!(
                        "{} {:>6} {:>10} {:>10}  {}",
                        mode,
                        id.to_string().yellow(),
                        info.size,
                        info.storage_size,
                        info.compander.cyan()
                    );
                } else {
                    println!("{}", id.to_string().yellow());
                }
            }
        }
    }
    Ok(())
}

fn cmd_rm(env: &Env, args: RmArgs) -> anyhow::Result<()> {
    if args.ids.is_empty() {
        bail!("no object ids given");
    }
    let session = env.session()?;
    for &raw in &args.ids {
        let id = PssId::new(raw);
        env.lobj
            .delete(session.store.as_ref(), id)
            .with_context(|| format!("deleting {id}"))?;
        println!("Deleted {}", id.to_string().yellow());
    }
    session.save()
}

fn cmd_backup(env: &Env, args: BackupArgs) -> anyhow::Result<()> {
    let session = env.session()?;
    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut pipe = StreamPipe::new(file);
    let mut progress = env.progress();
    let written = env.lobj.backup(
        &mut pipe,
        &session.store,
        PssId::new(args.id),
        args.compressed,
        Some(&mut progress),
    )?;
    let form = if args.compressed { "compressed" } else { "plain" };
    println!(
        "{} Backed up #{} to {} ({} bytes, {})",
        "✓".green().bold(),
        args.id,
        args.output.display(),
        written,
        form
    );
    Ok(())
}

fn cmd_restore(env: &Env, args: RestoreArgs) -> anyhow::Result<()> {
    let session = env.session()?;
    let file = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let mut pipe = StreamPipe::new(file);
    let mut progress = env.progress();
    let opts = compander_options(
        CreateOptions::default()
            .read_only(args.read_only)
            .named(args.input.display().to_string()),
        args.compander,
        args.row_bytes,
    );

    let id = if args.compressed {
        env.lobj
            .create_from_compressed(&session.store, &mut pipe, &opts, Some(&mut progress))?
    } else {
        let flags = RootFlags::from_bits(pipe.read_u32()?);
        if !flags.is_well_formed() {
            bail!("{} is not a large object backup", args.input.display());
        }
        let mut opts = opts;
        opts.size = pipe.read_size()?;
        opts.read_only |= flags.is_read_only();
        env.lobj
            .create(&session.store, Some(&mut pipe), &opts, Some(&mut progress))?
    };
    session.save()?;
    println!(
        "{} Restored {} as {}",
        "✓".green().bold(),
        args.input.display(),
        id.to_string().yellow()
    );
    Ok(())
}

fn cmd_dup(env: &Env, args: DupArgs) -> anyhow::Result<()> {
    let session = env.session()?;
    let id = PssId::new(args.id);
    let (copy, target) = match &args.into {
        None => {
            let copy = env
                .lobj
                .duplicate(session.store.as_ref(), id, session.store.as_ref())?;
            session.save()?;
            (copy, env.store_path.clone())
        }
        Some(path) => {
            let other = Session::open(path, &env.config.store)?;
            let copy = env
                .lobj
                .duplicate(session.store.as_ref(), id, other.store.as_ref())?;
            other.save()?;
            (copy, path.clone())
        }
    };
    println!(
        "{} Duplicated {} to {} in {}",
        "✓".green().bold(),
        id.to_string().yellow(),
        copy.to_string().yellow(),
        target.display()
    );
    Ok(())
}

fn cmd_gc(env: &Env) -> anyhow::Result<()> {
    let session = env.session()?;
    let removed = env.lobj.collect_garbage(session.store.as_ref())?;
    if removed > 0 {
        session.save()?;
    }
    println!("{} GC: {} interrupted objects removed.", "✓".green(), removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    fn run(store: &Path, args: &[&str]) -> anyhow::Result<()> {
        let store = store.to_str().unwrap();
        let head = ["pss", "--store", store];
        let argv = head.iter().chain(args).copied();
        run_command(Cli::try_parse_from(argv).unwrap())
    }

    fn listed(store: &Path) -> Vec<PssId> {
        let session = Session::open(store, &StoreConfig::default()).unwrap();
        LargeObjectStore::default()
            .list(session.store.as_ref())
            .unwrap()
    }

    fn sample() -> Vec<u8> {
        (0..5000u32).flat_map(|i| (i % 251).to_be_bytes()).collect()
    }

    // -----------------------------------------------------------------------
    // Image lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn init_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("s.pss");
        run(&store, &["init"]).unwrap();
        assert!(run(&store, &["init"]).is_err());
        run(&store, &["init", "--force"]).unwrap();
        assert!(listed(&store).is_empty());
    }

    #[test]
    fn missing_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("none.pss"), &["ls"]).unwrap_err();
        assert!(err.to_string().contains("opening store image"));
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    #[test]
    fn put_get_rm() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("s.pss");
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        fs::write(&input, sample()).unwrap();

        run(&store, &["init"]).unwrap();
        run(&store, &["put", input.to_str().unwrap()]).unwrap();
        let ids = listed(&store);
        assert_eq!(ids.len(), 1);

        let id = ids[0].get().to_string();
        run(&store, &["get", &id, "-o", output.to_str().unwrap()]).unwrap();
        assert_eq!(fs::read(&output).unwrap(), sample());
        run(&store, &["info", &id]).unwrap();
        run(&store, &["--format", "json", "ls"]).unwrap();

        run(&store, &["rm", &id]).unwrap();
        assert!(listed(&store).is_empty());
        assert!(run(&store, &["rm", &id]).is_err());
    }

    #[test]
    fn backup_and_restore_both_forms() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("s.pss");
        let input = dir.path().join("in.bin");
        fs::write(&input, sample()).unwrap();
        run(&store, &["init"]).unwrap();
        run(&store, &["put", input.to_str().unwrap(), "--row-bytes", "40"]).unwrap();
        let id = listed(&store)[0].get().to_string();

        for (name, flag) in [("plain.bak", None), ("packed.bak", Some("--compressed"))] {
            let backup = dir.path().join(name);
            let backup = backup.to_str().unwrap();
            let mut args = vec!["backup", id.as_str(), "-o", backup];
            args.extend(flag);
            run(&store, &args).unwrap();

            let mut args = vec!["restore", backup, "--row-bytes", "40"];
            args.extend(flag);
            run(&store, &args).unwrap();
        }

        let ids = listed(&store);
        assert_eq!(ids.len(), 3);
        for restored in &ids[1..] {
            let output = dir.path().join(format!("out{}.bin", restored.get()));
            run(
                &store,
                &["get", &restored.get().to_string(), "-o", output.to_str().unwrap()],
            )
            .unwrap();
            assert_eq!(fs::read(&output).unwrap(), sample());
        }
    }

    #[test]
    fn dup_into_another_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("a.pss");
        let other = dir.path().join("b.pss");
        let input = dir.path().join("in.bin");
        fs::write(&input, sample()).unwrap();
        run(&store, &["init"]).unwrap();
        run(&other, &["init"]).unwrap();
        run(&store, &["put", input.to_str().unwrap(), "--read-only"]).unwrap();
        let id = listed(&store)[0].get().to_string();

        run(&store, &["dup", &id]).unwrap();
        run(&store, &["dup", &id, "--into", other.to_str().unwrap()]).unwrap();
        assert_eq!(listed(&store).len(), 2);
        assert_eq!(listed(&other).len(), 1);
        run(&store, &["gc"]).unwrap();
        assert_eq!(listed(&store).len(), 2);
    }

    #[test]
    fn row_bytes_picks_the_pixel_compander() {
        let opts = compander_options(CreateOptions::new(8), None, Some(16));
        assert_eq!(opts.compander.as_deref(), Some(PIXEL_MAP_COMPANDER));
        assert_eq!(opts.parameters, Some(vec![0, 0, 0, 16]));

        let opts = compander_options(CreateOptions::new(8), Some("CSimpleStoreCompander".into()), None);
        assert_eq!(opts.compander.as_deref(), Some("CSimpleStoreCompander"));
        assert_eq!(opts.parameters, None);
    }
}
