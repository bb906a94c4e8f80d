use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use clut_config::ClutConfig;
use clut_core::{CompressionType, ParsedVersion, PlatformId, Snapshot, SnapshotDiff, VersionOverrides};
use clut_tool::snapshot_io::{
    clut_file_name, collect_operation_files, read_chain_snapshot, read_operations, read_snapshot, write_snapshot,
};
use clut_tool::{ChainVersion, IncludeFilter, InstallSession, VersionGraph, build_chain, installed_version};
use patch_client::PatchClient;
use tokio_util::sync::CancellationToken;
use utils::{LogFormat, init_logging};

const MIB: f64 = (1u64 << 20) as f64;

#[derive(Parser)]
#[clap(name = "clut", version, about = "Build chain lookup tables and install versions from them")]
struct ClutCommand {
    /// Log level, overriding CLUT_LOG_LEVEL; RUST_LOG still takes precedence.
    #[clap(long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the header and contents of a persisted snapshot.
    Inspect(InspectArg),
    /// Prints what changes between two persisted snapshots.
    Diff(DiffArg),
    /// Folds per-version operation files into a chain of persisted snapshots.
    Chain(ChainArg),
    /// Installs the version of a snapshot into a directory.
    Install(InstallArg),
    /// Rewrites a persisted snapshot with another compression.
    Recompress(RecompressArg),
}

#[derive(Args)]
struct InspectArg {
    file: PathBuf,
    /// List every file with its interval count and size.
    #[clap(long)]
    files: bool,
}

#[derive(Args)]
struct DiffArg {
    from: PathBuf,
    to: PathBuf,
    /// List the paths of every change.
    #[clap(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct ChainArg {
    /// Operation files named `<version>.json`, or directories holding them.
    #[clap(long, required = true, num_args = 1..)]
    ops: Vec<PathBuf>,
    /// Directory the snapshots are written to.
    #[clap(long, default_value = ".")]
    out: PathBuf,
    #[clap(long, default_value_t = CompressionType::Brotli)]
    compression: CompressionType,
    /// Snapshot to continue from. Without one the chain starts from an empty snapshot.
    #[clap(long)]
    base: Option<PathBuf>,
    /// Repository slug of a chain without a base snapshot.
    #[clap(long)]
    repository: Option<String>,
    /// Platform id of a chain without a base snapshot.
    #[clap(long, default_value_t = 0)]
    platform: u8,
    /// Base patch URL recorded in the snapshots.
    #[clap(long)]
    base_url: Option<String>,
    /// JSON version graph; only the chain leading to `--target` is folded.
    #[clap(long)]
    graph: Option<PathBuf>,
    /// Version the chain leads to; defaults to the newest version of the graph.
    #[clap(long, requires = "graph")]
    target: Option<ParsedVersion>,
    /// JSON table of per-repository version graph overrides.
    #[clap(long, requires = "graph")]
    overrides: Option<PathBuf>,
}

#[derive(Args)]
struct InstallArg {
    /// Snapshot of the version to install.
    #[clap(long, conflicts_with_all = ["clut_dir", "version"])]
    to: Option<PathBuf>,
    /// Snapshot of the version the output directory holds.
    #[clap(long, requires = "to")]
    from: Option<PathBuf>,
    /// Chain directory; the snapshots of `--version` and of the installed version are read from it.
    #[clap(long, requires = "version")]
    clut_dir: Option<PathBuf>,
    #[clap(long, requires = "clut_dir")]
    version: Option<ParsedVersion>,
    #[clap(long, default_value = ".")]
    output: PathBuf,
    /// Case-insensitive regexes matched against whole file paths. Without any every file is installed.
    #[clap(long)]
    include: Vec<String>,
    /// Directory of local `<patch_name>.patch` files read instead of the network.
    #[clap(long)]
    override_dir: Option<PathBuf>,
    /// Patch location for snapshots that carry none.
    #[clap(long)]
    base_url: Option<String>,
    /// Number of concurrent apply tasks.
    #[clap(long)]
    concurrency: Option<usize>,
}

#[derive(Args)]
struct RecompressArg {
    input: PathBuf,
    output: PathBuf,
    #[clap(long)]
    compression: CompressionType,
}

impl Command {
    async fn run(self, config: Arc<ClutConfig>, cancellation: CancellationToken) -> Result<()> {
        match self {
            Command::Inspect(arg) => inspect(arg),
            Command::Diff(arg) => diff(arg),
            Command::Chain(arg) => chain(arg),
            Command::Install(arg) => install(arg, config, cancellation).await,
            Command::Recompress(arg) => {
                let snapshot = read_snapshot(&arg.input)?;
                let size = write_snapshot(&arg.output, &snapshot, arg.compression)?;
                eprintln!("Wrote {} ({:.2} MiB, {})", arg.output.display(), size as f64 / MIB, arg.compression);
                Ok(())
            },
        }
    }
}

fn inspect(arg: InspectArg) -> Result<()> {
    let snapshot = read_snapshot(&arg.file)?;
    println!("Repository:  {}", snapshot.repository);
    println!("Version:     {}", snapshot.version);
    println!("Platform:    {:?}", snapshot.platform);
    println!("Patch URL:   {}", snapshot.base_patch_url.as_deref().unwrap_or("<none>"));
    println!("Folders:     {}", snapshot.folders.len());
    println!("Files:       {}", snapshot.files.len());
    println!("Intervals:   {}", snapshot.interval_count());

    if arg.files {
        for (path, map) in &snapshot.files {
            println!("{path}: {} intervals, {} bytes", map.len(), map.end());
        }
    }
    Ok(())
}

fn diff(arg: DiffArg) -> Result<()> {
    let from = read_snapshot(&arg.from)?;
    let to = read_snapshot(&arg.to)?;
    let diff = SnapshotDiff::between(&from, &to)?;

    println!("{} -> {}", diff.from_version, diff.to_version);
    println!("Added folders:   {}", diff.added_folders.len());
    println!("Removed folders: {}", diff.removed_folders.len());
    println!("Changed files:   {} ({} replaced)", diff.added_files.len(), diff.replaced_files.len());
    println!("Removed files:   {}", diff.removed_files.len());
    println!("Write size:      {:.2} MiB", diff.write_size() as f64 / MIB);
    println!("Download size:   {:.2} MiB", diff.download_size() as f64 / MIB);

    if arg.verbose {
        diff.added_folders.iter().for_each(|p| println!("+ {p}/"));
        diff.removed_folders.iter().for_each(|p| println!("- {p}/"));
        for (path, intervals) in &diff.added_files {
            let marker = if diff.replaced_files.contains(path) { "!" } else { "~" };
            println!("{marker} {path} ({} intervals)", intervals.len());
        }
        diff.removed_files.iter().for_each(|p| println!("- {p}"));
    }
    Ok(())
}

fn chain(arg: ChainArg) -> Result<()> {
    let mut base = match &arg.base {
        Some(path) => read_snapshot(path).with_context(|| format!("reading base snapshot {}", path.display()))?,
        None => {
            let repository = arg.repository.clone().context("--repository is required without --base")?;
            Snapshot::empty(repository, PlatformId::try_from(arg.platform)?)
        },
    };
    if let Some(url) = &arg.base_url {
        base = base.with_base_patch_url(url.as_str());
    }

    let files: BTreeMap<ParsedVersion, PathBuf> = collect_operation_files(&arg.ops)?.into_iter().collect();

    let versions: Vec<ParsedVersion> = match &arg.graph {
        Some(graph_path) => {
            let graph = VersionGraph::from_json(&std::fs::read_to_string(graph_path)?)?;
            let overrides = match &arg.overrides {
                Some(path) => VersionOverrides::from_json(&std::fs::read_to_string(path)?)?,
                None => VersionOverrides::new(),
            };
            let target = match arg.target.clone() {
                Some(target) => target,
                None => graph.latest().cloned().context("the version graph is empty")?,
            };
            graph.resolve_chain(&base.repository, &target, &overrides)?
        },
        None => files.keys().cloned().collect(),
    };

    let mut chain = Vec::new();
    for version in versions.into_iter().filter(|v| *v > base.version) {
        let Some(path) = files.get(&version) else {
            bail!("no operations file for version {version}");
        };
        chain.push(ChainVersion {
            operations: read_operations(path).with_context(|| format!("reading {}", path.display()))?,
            version,
        });
    }

    let summary = build_chain(base, chain, &arg.out, arg.compression)?;
    eprintln!(
        "Wrote {} snapshots to {}, latest {}",
        summary.written.len(),
        arg.out.display(),
        summary.snapshot.version
    );
    Ok(())
}

async fn install(arg: InstallArg, config: Arc<ClutConfig>, cancellation: CancellationToken) -> Result<()> {
    let (to, from) = match (&arg.to, &arg.clut_dir, &arg.version) {
        (Some(to), _, _) => {
            let from = arg.from.as_deref().map(read_snapshot).transpose()?;
            (read_snapshot(to)?, from)
        },
        (None, Some(dir), Some(version)) => {
            let to = read_chain_snapshot(dir, version)?;
            let from = match installed_version(&arg.output).await? {
                Some(installed) if installed != *version => Some(
                    read_chain_snapshot(dir, &installed)
                        .with_context(|| format!("reading {} from {}", clut_file_name(&installed), dir.display()))?,
                ),
                _ => None,
            };
            (to, from)
        },
        _ => bail!("either --to or --clut-dir with --version is required"),
    };

    let mut client = PatchClient::new(&config.client)?;
    if let Some(dir) = &arg.override_dir {
        client = client.with_override_dir(dir);
    }

    let mut session = InstallSession::new(to, &arg.output, Arc::new(client))
        .with_include(IncludeFilter::new(&arg.include)?)
        .with_config(config)
        .with_cancellation_token(cancellation);
    if let Some(from) = from {
        session = session.with_from(from);
    }
    if let Some(url) = arg.base_url {
        session = session.with_base_url(url);
    }
    if let Some(concurrency) = arg.concurrency {
        session = session.with_concurrency(concurrency);
    }

    let summary = session.run().await?;
    if summary.up_to_date {
        eprintln!("{} is already at {}", arg.output.display(), summary.to_version);
    } else {
        eprintln!(
            "Installed {} into {} ({:.2} MiB written, {} files filtered)",
            summary.to_version,
            arg.output.display(),
            summary.write_size as f64 / MIB,
            summary.filtered_files
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ClutCommand::parse();

    let config = Arc::new(ClutConfig::new());
    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level, LogFormat::from_config_str(&config.log.format))?;

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping");
            on_interrupt.cancel();
        }
    });

    cli.command.run(config, cancellation).await
}
