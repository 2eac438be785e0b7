use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trawl_client::{HttpEngine, SelectorParser};
use trawl_core::{Engine, EventKind, OptionsPatch, Scraper, ScriptSource, TracingObserver};

#[derive(Parser)]
#[command(name = "trawl", version, about = "Scrape pages through a concurrent job pipeline")]
struct Cli {
    /// URLs to scrape
    #[arg(required = true)]
    urls: Vec<String>,

    /// Maximum number of pages processed at once
    #[arg(short, long, env = "TRAWL_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Per-page timeout in milliseconds
    #[arg(short, long, env = "TRAWL_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Field to extract, as name=css-selector (repeatable)
    #[arg(short, long = "select")]
    select: Vec<String>,

    /// Automation script evaluated in each page (browser engine only)
    #[arg(long)]
    script: Option<String>,

    /// Render pages in headless Chromium instead of plain HTTP
    #[cfg(feature = "browser")]
    #[arg(long, default_value_t = false)]
    browser: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trawl=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30));

    #[cfg(feature = "browser")]
    if cli.browser {
        let engine = trawl_client::BrowserEngine::with_timeout(timeout)
            .await
            .context("Failed to launch browser")?;
        return scrape(engine, &cli).await;
    }

    let engine = HttpEngine::with_timeout(timeout).context("Failed to create HTTP client")?;
    scrape(engine, &cli).await
}

async fn scrape<E: Engine>(engine: E, cli: &Cli) -> Result<()> {
    let mut scraper = Scraper::new(engine);

    let mut patch = OptionsPatch::default()
        .with_name("trawl-cli")
        .with_max_concurrency(cli.concurrency);
    if let Some(ms) = cli.timeout_ms {
        patch = patch.with_timeout(Duration::from_millis(ms));
    }
    scraper.configure(patch).context("Invalid options")?;

    if !cli.select.is_empty() {
        let parser = SelectorParser::from_pairs(&cli.select).context("Invalid --select")?;
        scraper.set_parser(parser.into_parser())?;
    }
    if let Some(script) = &cli.script {
        scraper.set_script(ScriptSource::inline(script.clone()))?;
    }

    let failed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failed);
    scraper
        .subscribe(TracingObserver)
        .on(EventKind::JobFail, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .on_result(|error, req, res| {
            let line = serde_json::json!({
                "url": req.url,
                "status": res.status,
                "data": res.data,
                "error": error.map(|e| e.to_string()),
            });
            println!("{line}");
        });

    let total = scraper.add_feeds(cli.urls.iter().cloned())?.len();
    scraper.run().await.context("Scraper run failed")?;

    tracing::info!(
        total,
        failed = failed.load(Ordering::Relaxed),
        "Done"
    );
    Ok(())
}
