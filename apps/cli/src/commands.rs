//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use sitekb_core::{
    CreateKbConfig, CreateReport, ProgressReporter, SearchService, ServerStep, Services,
    create_knowledge_base,
};
use sitekb_discovery::{DiscoveryOptions, detect};
use sitekb_servergen::{RegistrationOutcome, UnregistrationOutcome};
use sitekb_shared::{
    AppConfig, CrawlConfig, EmbeddingIdentity, init_config, load_config, load_config_from,
};
use tracing::info;

use crate::serve;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sitekb: turn websites into searchable knowledge bases.
#[derive(Parser)]
#[command(
    name = "sitekb",
    version,
    about = "Crawl websites into local knowledge bases and search them semantically.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.sitekb/sitekb.toml.
    #[arg(long, env = "SITEKB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a website and build a knowledge base from it.
    Create {
        /// Site URL (scheme optional).
        url: String,

        /// Knowledge base name: letters, digits, hyphens and underscores.
        #[arg(short, long)]
        name: String,

        /// Maximum number of pages to index.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum link depth when no sitemap is found.
        #[arg(long)]
        max_depth: Option<u32>,

        /// Embed with the configured external provider.
        #[arg(long)]
        external: bool,

        /// Embedding model (defaults to the configured one).
        #[arg(long)]
        model: Option<String>,
    },

    /// List knowledge bases, newest first.
    List,

    /// Show metadata and live statistics for a knowledge base.
    Info {
        name: String,
    },

    /// Delete a knowledge base and its generated query server.
    Delete {
        name: String,
    },

    /// Search a knowledge base.
    Search {
        name: String,

        query: String,

        /// Maximum number of results.
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer JSON-lines queries for one knowledge base on stdin/stdout.
    Serve {
        name: String,
    },

    /// Show which crawl strategy a site would use.
    Detect {
        url: String,
    },

    /// List generated query servers.
    Servers,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// clean for command output.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitekb=warn",
        1 => "sitekb=info",
        2 => "sitekb=debug",
        _ => "sitekb=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Create {
            url,
            name,
            max_pages,
            max_depth,
            external,
            model,
        } => {
            cmd_create(
                &config,
                &url,
                &name,
                max_pages,
                max_depth,
                external,
                model.as_deref(),
            )
            .await
        }
        Command::List => cmd_list(&config),
        Command::Info { name } => cmd_info(&config, &name).await,
        Command::Delete { name } => cmd_delete(&config, &name).await,
        Command::Search {
            name,
            query,
            limit,
            json,
        } => cmd_search(&config, &name, &query, limit, json).await,
        Command::Serve { name } => {
            let services = Services::from_config(&config);
            let service = SearchService::new(services.registry, services.embedders);
            serve::run(&service, &name).await
        }
        Command::Detect { url } => cmd_detect(&config, &url).await,
        Command::Servers => cmd_servers(&config),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_create(
    config: &AppConfig,
    url: &str,
    name: &str,
    max_pages: Option<usize>,
    max_depth: Option<u32>,
    external: bool,
    model: Option<&str>,
) -> Result<()> {
    let services = Services::from_config(config);

    let mut crawl = CrawlConfig::from(config);
    if let Some(pages) = max_pages {
        crawl.max_pages = pages;
    }
    if let Some(depth) = max_depth {
        crawl.max_depth = depth;
    }

    let identity = match (external, model) {
        (true, Some(model)) => EmbeddingIdentity::external(model),
        (true, None) => EmbeddingIdentity::external(&config.embedding.external_model),
        (false, Some(model)) => EmbeddingIdentity::local(model),
        (false, None) => services.embedders.default_identity(),
    };

    let create = CreateKbConfig {
        name: name.to_string(),
        source_url: url.to_string(),
        crawl,
        identity,
        register_command: config.server.register_command.clone(),
        register_timeout: Duration::from_secs(config.server.register_timeout_secs),
    };

    info!(url, name, identity = %create.identity, "creating knowledge base");

    let reporter = CliProgress::new();
    let report = create_knowledge_base(&create, &services, &reporter).await;
    reporter.spinner.finish_and_clear();
    let report = report?;

    let kb = &report.kb;
    println!();
    println!("  Knowledge base created successfully!");
    println!("  Name:      {}", kb.name);
    println!("  Documents: {}", kb.metadata.documents);
    println!("  Strategy:  {}", report.crawl.strategy);
    println!("  Failed:    {}", report.crawl.failures.len());
    println!("  Embedding: {}", kb.embedding_identity());
    println!("  Path:      {}", kb.path.display());
    match &report.server {
        ServerStep::Generated { dir, registration } => {
            println!("  Server:    {}", dir.display());
            match registration {
                RegistrationOutcome::Registered => println!("  Registered with host application"),
                RegistrationOutcome::Failed(reason) => {
                    println!("  Warning: server registration failed: {reason}");
                }
                RegistrationOutcome::Skipped => {}
            }
        }
        ServerStep::Failed(reason) => {
            println!("  Warning: query server was not generated: {reason}");
        }
    }
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_fetched(&self, url: &str, current: usize, budget: usize) {
        self.spinner
            .set_message(format!("Fetching [{current}/{budget}] {url}"));
    }

    fn done(&self, _report: &CreateReport) {
        self.spinner.finish_and_clear();
    }
}

fn cmd_list(config: &AppConfig) -> Result<()> {
    let services = Services::from_config(config);
    let kbs = services.registry.list()?;

    if kbs.is_empty() {
        println!("No knowledge bases in {}", services.registry.kb_root().display());
        return Ok(());
    }

    println!(
        "{:<24} {:>6}  {:<22} {:<8} {}",
        "NAME", "DOCS", "CREATED", "SERVER", "SOURCE"
    );
    for summary in kbs {
        let meta = &summary.kb.metadata;
        println!(
            "{:<24} {:>6}  {:<22} {:<8} {}",
            summary.kb.name,
            meta.documents,
            meta.created_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            if summary.has_server { "yes" } else { "no" },
            meta.source_url,
        );
    }
    Ok(())
}

async fn cmd_info(config: &AppConfig, name: &str) -> Result<()> {
    let services = Services::from_config(config);
    let stats = services.registry.stats(name).await?;
    let meta = &stats.kb.metadata;

    println!("  Name:       {}", stats.kb.name);
    println!("  Source:     {}", meta.source_url);
    println!("  Created:    {}", meta.created_at.to_rfc3339());
    println!("  Embedding:  {}", stats.kb.embedding_identity());
    println!("  Documents:  {} (stored: {})", meta.documents, stats.stored_documents);
    if let Some(strategy) = &meta.strategy {
        println!("  Strategy:   {strategy}");
    }
    if let Some(max_pages) = meta.max_pages {
        println!("  Max pages:  {max_pages}");
    }
    println!("  Version:    {}", meta.version);
    println!("  Path:       {}", stats.kb.path.display());
    println!(
        "  Server:     {}",
        if stats.has_server {
            services.registry.servers().server_dir(name).display().to_string()
        } else {
            "none".to_string()
        }
    );
    Ok(())
}

async fn cmd_delete(config: &AppConfig, name: &str) -> Result<()> {
    let services = Services::from_config(config);
    let report = services.registry.delete(name).await?;
    if report.removed {
        println!("Deleted knowledge base '{name}'");
    } else {
        println!("No knowledge base named '{name}'");
    }
    match report.unregistration {
        UnregistrationOutcome::Unregistered => println!("Unregistered from host application"),
        UnregistrationOutcome::Failed(reason) => {
            println!("Warning: server unregistration failed: {reason}");
        }
        UnregistrationOutcome::Skipped => {}
    }
    Ok(())
}

async fn cmd_search(
    config: &AppConfig,
    name: &str,
    query: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let services = Services::from_config(config);
    let service = SearchService::new(services.registry, services.embedders);
    let results = service.search(name, query, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        let title = result.metadata.get("title").map(String::as_str).unwrap_or("Untitled");
        let source = result.metadata.get("source_url").map(String::as_str).unwrap_or("");
        println!("{}. {title}  (distance {:.4})", rank + 1, result.distance);
        println!("   {source}");
        println!("   {}", snippet(&result.content, 200));
        println!();
    }
    Ok(())
}

/// First `max_chars` characters of `text` on one line.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}

async fn cmd_detect(config: &AppConfig, url: &str) -> Result<()> {
    let opts = DiscoveryOptions::from(&CrawlConfig::from(config));
    let detection = detect(url, &opts).await;

    println!("  Seed:     {}", detection.seed);
    println!("  Strategy: {}", detection.strategy);
    println!("  Target:   {}", detection.target);
    Ok(())
}

fn cmd_servers(config: &AppConfig) -> Result<()> {
    let services = Services::from_config(config);
    let servers = services.registry.servers().list()?;

    if servers.is_empty() {
        println!("No query servers in {}", services.registry.servers().servers_dir().display());
        return Ok(());
    }
    for server in servers {
        println!(
            "{:<28} {:<24} {}",
            server.manifest.name,
            server.manifest.kb_name,
            server.manifest.command.join(" ")
        );
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
