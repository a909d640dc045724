use anyhow::Context;
use clap::Parser;
use metalwatch_core::alert::cooldown::CooldownTracker;
use metalwatch_core::ingest::fetcher::{FeedFetcher, HttpFeedFetcher};
use metalwatch_core::ingest::quote::{parse_quotes, QuotePatterns};
use metalwatch_core::pipeline::Pipeline;
use metalwatch_core::shutdown::ShutdownSignal;
use metalwatch_core::storage::cooldown::FileCooldownStore;
use metalwatch_core::time::schedule::Cadence;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod scheduler;

#[derive(Debug, Parser)]
#[command(name = "metalwatch_worker")]
struct Args {
    /// Run a single acquisition cycle and exit.
    #[arg(long)]
    once: bool,

    /// Fetch and parse the feed only. Nothing is stored and no alert is sent.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = metalwatch_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let fetcher = HttpFeedFetcher::from_settings(&settings)?;

    if args.dry_run {
        let raw = fetcher.fetch().await?;
        let text = raw.decode(&settings.feed_encoding);
        let quote = parse_quotes(&text, &QuotePatterns::from_settings(&settings))?;
        tracing::info!(
            dry_run = true,
            gold = quote.gold,
            silver = quote.silver,
            declared_charset = ?raw.declared_charset,
            "feed parsed"
        );
        return Ok(());
    }

    let pool = metalwatch_core::storage::connect(&settings.database_url).await?;
    metalwatch_core::storage::migrate(&pool).await?;

    let cooldown = CooldownTracker::open(
        Box::new(FileCooldownStore::new(&settings.cooldown_state_path)),
        chrono::Duration::hours(settings.cooldown_hours),
    );
    let notifier = metalwatch_core::notify::from_settings(&settings)?;
    tracing::info!(
        notifier = notifier.name(),
        windows = ?settings.alert_windows,
        cooldown_hours = settings.cooldown_hours,
        "worker configured"
    );

    let pipeline = Arc::new(Pipeline::from_settings(
        &settings,
        Box::new(fetcher),
        pool.clone(),
        cooldown,
        notifier,
    )?);
    let cadence = Cadence::from_settings(&settings)?;
    let mut scheduler = scheduler::Scheduler::new(pipeline, cadence);

    if args.once {
        let ok = scheduler.tick().await;
        pool.close().await;
        anyhow::ensure!(ok, "cycle failed");
        return Ok(());
    }

    let shutdown = ShutdownSignal::install()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let signal = shutdown.recv().await;
        tracing::info!(signal, "shutdown requested; waiting for in-flight cycle");
        let _ = shutdown_tx.send(true);
    });

    scheduler
        .run(shutdown_rx)
        .await
        .context("scheduler failed")?;

    pool.close().await;
    Ok(())
}

fn init_sentry(settings: &metalwatch_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
