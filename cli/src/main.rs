use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use continuity::{
    apply_manifest, build_manifest, verify_manifest, Context, Manifest, Resource,
};

/// A transport-agnostic filesystem metadata tool.
#[derive(Parser)]
#[command(name = "continuity", version)]
struct Cli {
    /// A global log level to use when printing logs. It's also possible to
    /// set `RUST_LOG` according to `tracing_subscriber::filter::EnvFilter`,
    /// which will always have priority.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a manifest for the provided root and write it to stdout.
    Build {
        root: PathBuf,

        /// Output format of the manifest.
        #[arg(long, value_enum, default_value_t = Format::Pb)]
        format: Format,
    },
    /// Verify the root against the provided manifest.
    Verify { root: PathBuf, manifest: PathBuf },
    /// Apply the manifest to the provided root.
    Apply { root: PathBuf, manifest: PathBuf },
    /// List the contents of the manifest.
    Ls { manifest: PathBuf },
    /// Print the JSON form of a manifest for inspection.
    Dump { manifest: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// The protobuf interchange form.
    #[value(name = "pb", alias = "application/vnd.continuity.manifest.v0+pb")]
    Pb,
    /// The JSON text form.
    #[value(name = "json", alias = "application/vnd.continuity.manifest.v0+json")]
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_string())),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Build { root, format } => build(&root, format),
        Command::Verify { root, manifest } => verify(&root, &manifest),
        Command::Apply { root, manifest } => apply(&root, &manifest),
        Command::Ls { manifest } => ls(&manifest),
        Command::Dump { manifest } => dump(&manifest),
    }
}

fn build(root: &Path, format: Format) -> anyhow::Result<()> {
    let ctx = Context::new(root).context("creating path context")?;
    let manifest = build_manifest(&ctx).context("generating manifest")?;

    let encoded = match format {
        Format::Pb => manifest.encode(),
        Format::Json => manifest.encode_json(),
    }
    .context("marshalling manifest")?;

    io::stdout()
        .write_all(&encoded)
        .context("writing to stdout")?;
    Ok(())
}

fn verify(root: &Path, manifest: &Path) -> anyhow::Result<()> {
    let manifest = read_manifest(manifest)?;
    let ctx = Context::new(root).context("creating path context")?;
    verify_manifest(&ctx, &manifest).context("verifying manifest")?;
    Ok(())
}

fn apply(root: &Path, manifest: &Path) -> anyhow::Result<()> {
    let manifest = read_manifest(manifest)?;
    let ctx = Context::new(root).context("creating path context")?;
    apply_manifest(&ctx, &manifest).context("applying manifest")?;
    Ok(())
}

fn ls(manifest: &Path) -> anyhow::Result<()> {
    let manifest = read_manifest(manifest)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for resource in &manifest.resources {
        let target = match resource {
            Resource::Symlink(link) => format!(" -> {}", link.target()),
            _ => String::new(),
        };
        let size = match resource {
            Resource::RegularFile(file) => file.size(),
            _ => 0,
        };

        for path in resource.paths() {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}{}",
                resource.mode(),
                resource.uid(),
                resource.gid(),
                humanize_bytes(size),
                path,
                target,
            )?;
        }
    }

    Ok(())
}

fn dump(manifest: &Path) -> anyhow::Result<()> {
    let manifest = read_manifest(manifest)?;
    let json: serde_json::Value = serde_json::from_slice(&manifest.encode_json()?)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Reads a manifest in either wire form, sniffing JSON by its leading brace.
fn read_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let buf = fs::read(path).with_context(|| format!("reading manifest {}", path.display()))?;

    let manifest = if buf.first() == Some(&b'{') {
        Manifest::decode_json(&buf)
    } else {
        Manifest::decode(&buf)
    };
    manifest.with_context(|| format!("decoding manifest {}", path.display()))
}

fn humanize_bytes(size: u64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];

    if size < 1000 {
        return format!("{size} B");
    }

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
