mod config;
mod content;
mod fetch;
mod markdown;
mod paths;
mod repo;
mod session;
#[cfg(test)]
mod test_support;

use std::fmt::Write as _;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, Level};

use config::Config;
use content::types::{Content, Module};
use content::Downloader;
use fetch::HttpFetcher;
use repo::Repository;
use session::Session;

/// Download a Microsoft Learn module or learning path with all of its
/// Markdown includes, code snippets and images resolved.
#[derive(Debug, Parser)]
#[command(name = "learn-resolver", version)]
struct Cli {
    /// Learn URL, repository folder, or (with --uid) a content UID
    input: String,

    /// Treat INPUT as a module or learning path UID
    #[arg(long)]
    uid: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    repo: Option<String>,

    #[arg(long)]
    branch: Option<String>,

    /// Ceiling on simultaneous requests
    #[arg(long)]
    max_concurrent: Option<usize>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let _ = dotenv::dotenv();
    let config = apply_overrides(Config::from_env(), &cli);
    info!(
        owner = %config.repo_owner,
        repo = %config.repo_name,
        branch = %config.repo_branch,
        "Using content repository"
    );

    let fetcher = HttpFetcher::new(&config)?;
    let session = Session::new(fetcher, Repository::from_config(&config));
    let downloader = Downloader::new(session);

    let content = downloader
        .download(&cli.input, cli.uid)
        .await
        .with_context(|| format!("Failed to download '{}'", cli.input))?;

    let output = match cli.format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&content).context("Failed to serialize content")?
        }
        OutputFormat::Markdown => render_markdown(&content),
    };
    println!("{}", output);
    Ok(())
}

fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(owner) = &cli.owner {
        config.repo_owner = owner.clone();
    }
    if let Some(repo) = &cli.repo {
        config.repo_name = repo.clone();
    }
    if let Some(branch) = &cli.branch {
        config.repo_branch = branch.clone();
    }
    if let Some(max) = cli.max_concurrent {
        config.max_concurrent_requests = max.max(1);
    }
    config
}

/// Single Markdown document with image tokens swapped for their data URLs.
fn render_markdown(content: &Content) -> String {
    let mut out = String::new();
    match content {
        Content::Module(module) => render_module(&mut out, module, "#"),
        Content::LearningPath(path) => {
            let _ = writeln!(out, "# {}\n", path.title);
            if !path.summary.is_empty() {
                let _ = writeln!(out, "{}\n", path.summary.trim());
            }
            for module in &path.modules {
                render_module(&mut out, module, "##");
            }
        }
    }
    out
}

fn render_module(out: &mut String, module: &Module, heading: &str) {
    let _ = writeln!(
        out,
        "{} {}\n\n_{} units, {} minutes_\n",
        heading,
        module.title,
        module.units.len(),
        module.total_duration_minutes()
    );
    for unit in &module.units {
        let _ = writeln!(out, "{}# {}\n", heading, unit.title);
        let Some(md) = &unit.markdown_content else {
            continue;
        };
        let mut body = md.content.clone();
        for image in &md.images {
            if let Some(data) = module.image_reference_map.get(&image.reference) {
                body = body.replace(&format!("]({}", image.reference), &format!("]({}", data));
            }
        }
        let _ = writeln!(out, "{}\n", body.trim_end());
    }
}
