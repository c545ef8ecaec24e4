//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use shopally_core::{
    AlertScanner, EnrichmentOrchestrator, Scope, SearchProgress, SearchRequest, SearchResult,
    SearchService, TickReport,
};
use shopally_gateways::{
    FxConverter, GeminiClient, HttpCatalogGateway, HttpPushSender, KeyPool, LlmContentEnricher,
    LlmIntentParser,
};
use shopally_shared::{
    AlertScanConfig, AppConfig, CompletionClient, EnrichmentConfig, KeyValueCache, init_config,
    load_config,
};
use shopally_storage::Storage;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ShopAlly: find products with AI help and get told when prices drop.
#[derive(Parser)]
#[command(
    name = "shopally",
    version,
    about = "AI-assisted product search and price-drop alerts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
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
    /// Search products for a free-text query.
    Search {
        /// What you are looking for, in English or Amharic.
        query: String,

        /// Response language (defaults to search.default_language).
        #[arg(short, long)]
        lang: Option<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,

        /// Show at most this many results.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Price-drop subscriptions and the alert scanner.
    Alerts {
        #[command(subcommand)]
        action: AlertsAction,
    },

    /// Currency exchange rates.
    Fx {
        #[command(subcommand)]
        action: FxAction,
    },

    /// Enrichment cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the LLM API keys found in the environment.
    Keys,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Alert subcommands.
#[derive(Subcommand)]
pub(crate) enum AlertsAction {
    /// Watch a product for price drops.
    Add {
        /// Push token of the device to notify.
        #[arg(long, env = "SHOPALLY_DEVICE_TOKEN")]
        token: String,

        /// Catalog id of the product.
        item_id: String,

        /// Current price in USD; drops are measured from here.
        price: f64,

        /// Product name used in notifications.
        #[arg(short, long, default_value = "")]
        title: String,
    },
    /// List subscriptions.
    List {
        /// Only subscriptions owned by this push token.
        #[arg(long)]
        token: Option<String>,
    },
    /// Stop watching a product.
    Remove {
        /// Subscription id.
        id: String,

        /// Delete the row instead of deactivating it.
        #[arg(long)]
        purge: bool,
    },
    /// Run a single scan and exit.
    Scan,
    /// Scan on the configured interval until interrupted.
    Run,
}

/// Exchange-rate subcommands.
#[derive(Subcommand)]
pub(crate) enum FxAction {
    /// Store the USD to ETB rate.
    Set {
        /// ETB per USD.
        rate: f64,
    },
    /// Print the stored USD to ETB rate.
    Show,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete expired cache entries.
    Purge,
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

const LOG_TARGETS: &[&str] = &[
    "shopally_cli",
    "shopally_core",
    "shopally_gateways",
    "shopally_storage",
    "shopally_shared",
];

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// clean for results.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

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
    match cli.command {
        Command::Search {
            query,
            lang,
            json,
            limit,
        } => cmd_search(&query, lang, json, limit).await,
        Command::Alerts { action } => match action {
            AlertsAction::Add {
                token,
                item_id,
                price,
                title,
            } => cmd_alerts_add(&token, &item_id, price, &title).await,
            AlertsAction::List { token } => cmd_alerts_list(token.as_deref()).await,
            AlertsAction::Remove { id, purge } => cmd_alerts_remove(&id, purge).await,
            AlertsAction::Scan => cmd_alerts_scan().await,
            AlertsAction::Run => cmd_alerts_run().await,
        },
        Command::Fx { action } => match action {
            FxAction::Set { rate } => cmd_fx_set(rate).await,
            FxAction::Show => cmd_fx_show().await,
        },
        Command::Cache { action } => match action {
            CacheAction::Purge => cmd_cache_purge().await,
        },
        Command::Keys => cmd_keys().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Loaded config plus the opened database.
struct App {
    config: AppConfig,
    storage: Arc<Storage>,
}

impl App {
    async fn open() -> Result<Self> {
        let config = load_config()?;
        let db_path = config.db_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| eyre!("cannot create {}: {e}", parent.display()))?;
        }
        let storage = Arc::new(Storage::open(&db_path).await?);
        Ok(Self { config, storage })
    }

    /// Open the database without write access. `None` when it has not been
    /// created yet.
    async fn open_readonly() -> Result<Option<Self>> {
        let config = load_config()?;
        let db_path = config.db_path()?;
        if !db_path.exists() {
            return Ok(None);
        }
        let storage = Arc::new(Storage::open_readonly(&db_path).await?);
        Ok(Some(Self { config, storage }))
    }

    fn cache(&self) -> Arc<dyn KeyValueCache> {
        self.storage.clone()
    }

    fn fx(&self) -> FxConverter {
        FxConverter::new(self.cache())
    }

    fn catalog(&self) -> Result<Arc<HttpCatalogGateway>> {
        Ok(Arc::new(HttpCatalogGateway::new(
            &self.config.catalog,
            self.fx(),
        )?))
    }

    fn completion_client(&self) -> Result<Arc<dyn CompletionClient>> {
        let keys = Arc::new(KeyPool::from_env(&self.config.llm.api_key_env_prefix));
        if keys.is_empty() {
            return Err(eyre!(
                "no LLM API keys found; set {}1 (and {}2, ...)",
                self.config.llm.api_key_env_prefix,
                self.config.llm.api_key_env_prefix
            ));
        }
        info!(keys = keys.len(), model = %self.config.llm.model, "LLM client ready");
        Ok(Arc::new(GeminiClient::new(&self.config.llm, keys)?))
    }

    fn search_service(&self) -> Result<SearchService> {
        let client = self.completion_client()?;
        let intent = LlmIntentParser::new(client.clone()).with_fx(self.fx());
        let enricher = LlmContentEnricher::new(client);
        let orchestrator = EnrichmentOrchestrator::new(
            Arc::new(enricher),
            self.cache(),
            EnrichmentConfig::from(&self.config),
        );
        Ok(SearchService::new(
            Arc::new(intent),
            self.catalog()?,
            orchestrator,
            &self.config,
        ))
    }

    fn alert_scanner(&self) -> Result<AlertScanner> {
        let sender = HttpPushSender::new(&self.config.push)?;
        Ok(AlertScanner::new(
            self.storage.clone(),
            self.catalog()?,
            Arc::new(sender),
            AlertScanConfig::from(&self.config),
        ))
    }
}

/// A scope cancelled by Ctrl-C.
fn interruptible_scope() -> Scope {
    let scope = Scope::new();
    let watcher = scope.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, shutting down");
            watcher.cancel();
        }
    });
    scope
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

async fn cmd_search(
    query: &str,
    lang: Option<String>,
    json: bool,
    limit: Option<usize>,
) -> Result<()> {
    let app = App::open().await?;
    let service = app.search_service()?;

    let mut request = SearchRequest::new(query);
    if let Some(lang) = lang {
        request = request.with_language(lang);
    }

    let scope = interruptible_scope();
    let reporter = CliProgress::new();
    let mut result = service.search(&request, &scope, &reporter).await?;
    if let Some(limit) = limit {
        result.items.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result.items)?);
        return Ok(());
    }

    println!();
    if result.degraded {
        println!("  Showing unranked results: product summaries are unavailable right now.");
        println!();
    }
    if result.items.is_empty() {
        println!("  No matching products for \"{}\".", result.keywords);
    }
    for (rank, item) in result.items.iter().enumerate() {
        println!(
            "  {:>2}. [{:>3}] {}",
            rank + 1,
            item.relevance,
            item.title
        );
        println!(
            "           ${:.2}  ETB {:.2}  rating {:.1}  seller {:.0}  id {}",
            item.price.usd, item.price.etb, item.rating, item.seller_score, item.id
        );
        for highlight in &item.highlights {
            println!("           - {highlight}");
        }
    }
    println!();
    println!(
        "  {} of {} candidates  (lang {}, cached {}, enriched {}, removed {}, failed {})",
        result.items.len(),
        result.candidates,
        result.language,
        result.stats.cache_hits,
        result.stats.enriched,
        result.stats.removed,
        result.stats.failed + result.stats.abandoned,
    );
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
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|style| {
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            })
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl SearchProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_enriched(&self, current: usize, total: usize, item_id: &str) {
        self.spinner
            .set_message(format!("Enriching [{current}/{total}] {item_id}"));
    }

    fn done(&self, _result: &SearchResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

async fn cmd_alerts_add(token: &str, item_id: &str, price: f64, title: &str) -> Result<()> {
    let app = App::open().await?;
    let sub = app
        .storage
        .insert_subscription(token, item_id, title, price)
        .await?;
    info!(id = %sub.id, item_id, price, "subscription created");
    println!("Watching {} at ${:.2} (subscription {})", sub.item_id, sub.reference_price, sub.id);
    Ok(())
}

async fn cmd_alerts_list(token: Option<&str>) -> Result<()> {
    let subs = match App::open_readonly().await? {
        Some(app) => app.storage.list_subscriptions(token).await?,
        None => Vec::new(),
    };
    if subs.is_empty() {
        println!("No subscriptions.");
        return Ok(());
    }
    for sub in subs {
        println!(
            "  {}  {:<8}  ${:>9.2}  {}  {}",
            sub.id,
            if sub.active { "active" } else { "inactive" },
            sub.reference_price,
            sub.item_id,
            sub.created_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

async fn cmd_alerts_remove(id: &str, purge: bool) -> Result<()> {
    let app = App::open().await?;
    let changed = if purge {
        app.storage.delete_subscription(id).await?
    } else {
        app.storage.deactivate_subscription(id).await?
    };
    if !changed {
        return Err(eyre!("no active subscription with id '{id}'"));
    }
    println!("Subscription {id} {}.", if purge { "deleted" } else { "deactivated" });
    Ok(())
}

async fn cmd_alerts_scan() -> Result<()> {
    let app = App::open().await?;
    let scanner = app.alert_scanner()?;
    let report = scanner.tick(&interruptible_scope()).await?;
    print_tick_report(&report);
    Ok(())
}

async fn cmd_alerts_run() -> Result<()> {
    let app = App::open().await?;
    let scanner = app.alert_scanner()?;
    scanner.run(&interruptible_scope()).await;
    Ok(())
}

fn print_tick_report(report: &TickReport) {
    println!();
    println!("  Scan complete");
    println!("  Subscriptions: {}", report.subscriptions);
    println!("  Prices found:  {}", report.quotes);
    println!("  Price drops:   {}", report.drops);
    println!(
        "  Notified:      {} ({} failed)",
        report.notified, report.notify_failures
    );
    println!(
        "  Updated:       {} ({} failed)",
        report.updated, report.update_failures
    );
    println!();
}

// ---------------------------------------------------------------------------
// FX, cache, keys
// ---------------------------------------------------------------------------

async fn cmd_fx_set(rate: f64) -> Result<()> {
    let app = App::open().await?;
    app.fx().set_rate("USD", "ETB", rate).await?;
    println!("1 USD = {rate} ETB");
    Ok(())
}

async fn cmd_fx_show() -> Result<()> {
    let rate = match App::open_readonly().await? {
        Some(app) => app.fx().rate("USD", "ETB").await.ok(),
        None => None,
    };
    match rate {
        Some(rate) => println!("1 USD = {rate} ETB"),
        None => println!("No USD to ETB rate stored. Set one with `shopally fx set <rate>`."),
    }
    Ok(())
}

async fn cmd_cache_purge() -> Result<()> {
    let app = App::open().await?;
    let removed = app.storage.purge_expired().await?;
    println!("Removed {removed} expired cache entries.");
    Ok(())
}

async fn cmd_keys() -> Result<()> {
    let config = load_config()?;
    let keys = KeyPool::from_env(&config.llm.api_key_env_prefix);
    if keys.is_empty() {
        println!("No keys found under {}*.", config.llm.api_key_env_prefix);
        return Ok(());
    }
    for stats in keys.stats() {
        println!("  {}", stats.hint);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
