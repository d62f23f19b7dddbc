//! Imports one package and prints the analysis report as JSON.
//!
//! ```text
//! scene-import <archive|mesh|url> [--config <url>] [--asset <name>=<url>]...
//! ```
//!
//! Local paths are read from disk. With the `http` feature, `http(s)://`
//! urls are imported as remote scene descriptions or meshes.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use scene_assembler::{ImportConfig, ImportFlow, Package, UrlSet};

#[derive(Parser)]
#[command(name = "scene-import")]
#[command(about = "Imports a CAD package and prints its analysis as JSON", long_about = None)]
struct Cli {
    /// Zip archive or mesh file, or an http(s) url of a scene description or mesh
    target: String,
    /// Physics hints url (remote imports only)
    #[arg(long)]
    config: Option<String>,
    /// Named asset url as <name>=<url>; may be repeated
    #[arg(long = "asset", value_parser = parse_asset)]
    assets: Vec<(String, String)>,
}

fn parse_asset(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok((name.to_string(), url.to_string()))
        }
        _ => Err(format!("expected <name>=<url>, got '{value}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        eprintln!("Warning: Could not initialize logger: {}", e);
    };

    let args = Cli::parse();
    let config = ImportConfig::from_env();
    let is_url = args.target.starts_with("http://") || args.target.starts_with("https://");

    let report = if is_url {
        let mut urls = UrlSet::new(&args.target);
        if let Some(config) = args.config {
            urls = urls.with_config(config);
        }
        for (name, url) in args.assets {
            urls = urls.with_asset(name, url);
        }
        import_remote(urls, &config).await?
    } else {
        let path = PathBuf::from(&args.target);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("could not read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.target.clone());
        let root = path.parent().map_or_else(|| PathBuf::from("."), PathBuf::from);
        let flow = ImportFlow::new(scene_assembler::DirFetcher::new(root), &config);
        flow.import(Package::Bytes { file_name, bytes }).await?.report
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(feature = "http")]
async fn import_remote(
    urls: UrlSet,
    config: &ImportConfig,
) -> anyhow::Result<scene_assembler::ImportReport> {
    let flow = ImportFlow::new(scene_assembler::HttpFetcher::new(), config);
    Ok(flow.import(Package::Remote(urls)).await?.report)
}

#[cfg(not(feature = "http"))]
async fn import_remote(
    urls: UrlSet,
    _config: &ImportConfig,
) -> anyhow::Result<scene_assembler::ImportReport> {
    anyhow::bail!("{} is a url, but the `http` feature is disabled", urls.primary)
}
