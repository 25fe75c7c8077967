use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quotefeed_core::{normalize_symbol, FeedConfig, PriceStore, QuoteSource};
use quotefeed_data::{InMemoryPriceStore, PostgresPriceStore};
use quotefeed_sources::{resolve_upstream, CachedSource, PersistenceWriter, VendorKeys};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "quotefeed")]
#[command(about = "Market-data feed: cached, fallback-aware quotes streamed over WebSocket")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// TOML file with feed tunables (cache TTL, poll interval, buffers)
    #[arg(short, long, env = "QUOTEFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL. Without one, prices are cached in memory only.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Alpha Vantage API key
    #[arg(long, env = "ALPHAVANTAGE_API_KEY", hide_env_values = true)]
    alphavantage_api_key: Option<String>,

    /// Finnhub API key
    #[arg(long, env = "FINNHUB_API_KEY", hide_env_values = true)]
    finnhub_api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP + WebSocket server
    Server {
        /// Port to listen on (ignored when --bind is given)
        #[arg(short, long, env = "PORT", default_value = "8080")]
        port: u16,

        /// Full bind address, e.g. 127.0.0.1:9000
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Fetch one quote and print it as JSON
    Quote {
        /// Ticker symbol (e.g. "AAPL")
        symbol: String,
    },

    /// Fetch intraday candles and print them as JSON
    Intraday {
        /// Ticker symbol (e.g. "AAPL")
        symbol: String,

        /// Candle interval (1min, 5min, 15min, 30min, 60min)
        #[arg(short, long, default_value = "1min")]
        interval: String,

        /// Most recent candles to keep (0 = all)
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.log_json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    let config = match &cli.config {
        Some(path) => FeedConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FeedConfig::default(),
    };

    let keys = VendorKeys {
        alpha_vantage: cli.alphavantage_api_key.clone(),
        finnhub: cli.finnhub_api_key.clone(),
    };
    let store = open_store(cli.database_url.as_deref()).await?;
    let writer = PersistenceWriter::new(config.persist_queue_capacity);
    writer.spawn(store.clone(), config.persist_timeout());

    let upstream = resolve_upstream(&keys, config.upstream_timeout())
        .map_err(|e| anyhow::anyhow!("Failed to build quote source: {}", e))?;
    let source: Arc<dyn QuoteSource> = Arc::new(CachedSource::new(
        upstream,
        store,
        writer.clone(),
        config.cache_ttl(),
    ));

    match cli.command {
        Commands::Server { port, bind } => {
            let bind = bind.unwrap_or_else(|| format!("0.0.0.0:{port}"));
            quotefeed_api::start_server(source, config, &bind).await?;
        }
        Commands::Quote { symbol } => {
            let symbol = normalize_symbol(&symbol);
            let quote = source
                .fetch_quote(&symbol)
                .await
                .map_err(|e| anyhow::anyhow!("Quote for {} failed: {}", symbol, e))?;
            println!("{}", serde_json::to_string_pretty(&quote)?);
            flush_writes(&writer, &config).await;
        }
        Commands::Intraday {
            symbol,
            interval,
            limit,
        } => {
            let symbol = normalize_symbol(&symbol);
            let candles = source
                .fetch_intraday(&symbol, &interval, limit)
                .await
                .map_err(|e| anyhow::anyhow!("Intraday for {} failed: {}", symbol, e))?;
            println!("{}", serde_json::to_string_pretty(&candles)?);
        }
    }

    Ok(())
}

/// PostgreSQL when a URL is configured (migrated and pinged), otherwise an
/// in-process store.
async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn PriceStore>> {
    let Some(database_url) = database_url.filter(|url| !url.is_empty()) else {
        tracing::info!("No DATABASE_URL set, caching prices in memory");
        return Ok(Arc::new(InMemoryPriceStore::new()));
    };

    let pool = sqlx::PgPool::connect(database_url)
        .await
        .context("Failed to connect to database")?;
    quotefeed_data::db::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    quotefeed_data::db::ping(&pool)
        .await
        .context("Database ping failed")?;
    tracing::info!("Connected to database");
    Ok(Arc::new(PostgresPriceStore::new(pool)))
}

/// Give a one-shot command's cache write a chance to land before exit.
async fn flush_writes(writer: &PersistenceWriter, config: &FeedConfig) {
    if !writer.drain(config.persist_timeout()).await {
        tracing::warn!(pending = writer.pending(), "Exiting with cache writes still pending");
    }
}
