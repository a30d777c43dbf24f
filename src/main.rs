use anyhow::Result;
use clap::{Args, Parser};
use package_loader::{Loader, LoaderConfig, ManifestFetcher};
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pkgload")]
#[command(about = "Load dependency-ordered packages from TOML manifests")]
struct Cli {
    #[command(flatten)]
    mode: ModeArgs,

    /// Loader configuration file (.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Base path package names are resolved against
    #[arg(long, short)]
    path: Option<String>,

    /// Extension of package manifests
    #[arg(long)]
    extension: Option<String>,

    /// Fail fetches that take longer than this many milliseconds (0 waits forever)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Packages to load, e.g. `fx` or `ui.widgets`
    #[arg(required = true)]
    packages: Vec<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ModeArgs {
    /// Print where each package would be fetched from, without loading
    #[arg(long, short)]
    dry_run: bool,

    /// Load the packages and export the dependency graph to a DOT file (graph.dot)
    #[arg(long, short)]
    export: bool,

    /// Load the packages and print the published namespace as JSON
    #[arg(long, short)]
    load: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    let loader = Loader::builder(ManifestFetcher).config(config).build();

    if cli.mode.dry_run {
        for package in &cli.packages {
            println!("{package} -> {}", loader.resolve(package)?);
        }
        return Ok(());
    }

    let failures = load_all(&loader, &cli.packages).await;

    if cli.mode.export {
        let filename = "graph.dot";
        loader.graph().write_dot_file(filename)?;
        println!("Graph exported to {filename}");
    } else if cli.mode.load {
        println!("{}", serde_json::to_string_pretty(&loader.namespace_json())?);
    }

    if failures > 0 {
        anyhow::bail!("{failures} package(s) failed to load");
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<LoaderConfig> {
    let mut config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(path) = &cli.path {
        config.base_path = path.clone();
    }
    if let Some(extension) = &cli.extension {
        config.extension = extension.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.fetch_timeout_ms = Some(timeout_ms);
    }
    Ok(config)
}

async fn load_all(loader: &Loader<ManifestFetcher>, packages: &[String]) -> usize {
    let handles: Vec<_> = packages.iter().map(|package| loader.require(package)).collect();
    let mut failures = 0;
    for handle in handles {
        let package = handle.package().to_string();
        match handle.await {
            Ok(exports) => {
                tracing::info!(%package, members = exports.len(), "loaded");
            }
            Err(e) => {
                failures += 1;
                eprintln!("Error: {e}");
                let mut source = e.source();
                while let Some(cause) = source {
                    eprintln!("  caused by: {cause}");
                    source = cause.source();
                }
            }
        }
    }
    for stalled in loader.pending() {
        let waiting_on: Vec<_> = stalled.waiting_on.iter().map(|name| name.as_str()).collect();
        eprintln!(
            "Warning: package '{}' is still pending (waiting on {waiting_on:?})",
            stalled.name
        );
    }
    failures
}
