use crate::alert;
use crate::alert::cooldown::CooldownTracker;
use crate::config::Settings;
use crate::domain::alert::{cooldown_key, default_windows, AlertEvent, AlertWindow};
use crate::domain::price::{MetalType, Quote};
use crate::error::CycleError;
use crate::ingest::fetcher::FeedFetcher;
use crate::ingest::quote::{parse_quotes, QuotePatterns};
use crate::notify::{self, Notifier};
use crate::storage::prices;
use crate::time::market_date;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

const DEFAULT_FALLBACK_ENCODING: &str = "GBK";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum NotifyOutcome {
    NotTriggered,
    Sent,
    Suppressed,
    /// Delivery failed; cooldown untouched so the next cycle retries.
    Failed(String),
    /// Delivered, but the cooldown write failed.
    SentUnrecorded(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct MetalOutcome {
    pub metal: MetalType,
    pub price: f64,
    pub triggered: Vec<AlertEvent>,
    pub key: Option<String>,
    pub notification: NotifyOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub date: NaiveDate,
    pub gold: f64,
    pub silver: f64,
    pub metals: Vec<MetalOutcome>,
}

/// fetch -> parse -> store -> evaluate -> cooldown -> notify, for both metals.
pub struct Pipeline {
    fetcher: Box<dyn FeedFetcher>,
    pool: SqlitePool,
    cooldown: Mutex<CooldownTracker>,
    notifier: Box<dyn Notifier>,
    patterns: QuotePatterns,
    windows: Vec<AlertWindow>,
    fallback_encoding: String,
    offset: FixedOffset,
}

impl Pipeline {
    pub fn new(
        fetcher: Box<dyn FeedFetcher>,
        pool: SqlitePool,
        cooldown: CooldownTracker,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            fetcher,
            pool,
            cooldown: Mutex::new(cooldown),
            notifier,
            patterns: QuotePatterns::default(),
            windows: default_windows(),
            fallback_encoding: DEFAULT_FALLBACK_ENCODING.to_string(),
            offset: Utc.fix(),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        fetcher: Box<dyn FeedFetcher>,
        pool: SqlitePool,
        cooldown: CooldownTracker,
        notifier: Box<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(fetcher, pool, cooldown, notifier)
            .with_patterns(QuotePatterns::from_settings(settings))
            .with_windows(AlertWindow::from_day_counts(&settings.alert_windows))
            .with_fallback_encoding(&settings.feed_encoding)
            .with_offset(settings.market_offset()?))
    }

    pub fn with_patterns(mut self, patterns: QuotePatterns) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_windows(mut self, windows: Vec<AlertWindow>) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_fallback_encoding(mut self, label: &str) -> Self {
        self.fallback_encoding = label.to_string();
        self
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn windows(&self) -> &[AlertWindow] {
        &self.windows
    }

    /// Fetch and parse only. Nothing is written.
    pub async fn acquire(&self) -> Result<Quote, CycleError> {
        let raw = self.fetcher.fetch().await.map_err(CycleError::Fetch)?;
        let text = raw.decode(&self.fallback_encoding);
        let quote = parse_quotes(&text, &self.patterns)?;
        tracing::info!(gold = quote.gold, silver = quote.silver, "feed quote parsed");
        Ok(quote)
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let quote = self.acquire().await?;
        let date = market_date(now, self.offset);

        prices::upsert_cycle(&self.pool, date, &quote.pairs())
            .await
            .map_err(CycleError::Store)?;
        tracing::info!(%date, gold = quote.gold, silver = quote.silver, "daily prices stored");

        let mut metals = Vec::with_capacity(MetalType::ALL.len());
        for metal in MetalType::ALL {
            let price = quote.price(metal);
            let triggered = alert::evaluate(&self.pool, metal, price, date, &self.windows)
                .await
                .map_err(CycleError::Store)?;
            metals.push(self.dispatch(metal, price, triggered, now).await);
        }

        Ok(CycleReport {
            date,
            gold: quote.gold,
            silver: quote.silver,
            metals,
        })
    }

    async fn dispatch(
        &self,
        metal: MetalType,
        price: f64,
        triggered: Vec<AlertEvent>,
        now: DateTime<Utc>,
    ) -> MetalOutcome {
        if triggered.is_empty() {
            return MetalOutcome {
                metal,
                price,
                triggered,
                key: None,
                notification: NotifyOutcome::NotTriggered,
            };
        }

        let key = cooldown_key(metal, &triggered);
        let mut tracker = self.cooldown.lock().await;

        let notification = if !tracker.should_send(&key, now) {
            tracing::info!(
                %metal,
                price,
                key = %key,
                last_sent = ?tracker.last_sent(&key),
                "alert suppressed by cooldown"
            );
            NotifyOutcome::Suppressed
        } else {
            let subject = notify::subject(metal, &triggered);
            match self.notifier.notify(&subject, metal, &triggered).await {
                Ok(()) => match tracker.record_sent(&key, now) {
                    Ok(()) => {
                        tracing::info!(
                            %metal,
                            price,
                            key = %key,
                            notifier = self.notifier.name(),
                            "alert sent"
                        );
                        NotifyOutcome::Sent
                    }
                    Err(err) => {
                        let detail = format!("{err:#}");
                        tracing::error!(
                            %metal,
                            key = %key,
                            error = %detail,
                            "alert sent but cooldown not persisted"
                        );
                        NotifyOutcome::SentUnrecorded(detail)
                    }
                },
                Err(err) => {
                    let detail = format!("{err:#}");
                    tracing::warn!(
                        %metal,
                        key = %key,
                        notifier = self.notifier.name(),
                        error = %detail,
                        "alert delivery failed"
                    );
                    NotifyOutcome::Failed(detail)
                }
            }
        };

        MetalOutcome {
            metal,
            price,
            triggered,
            key: Some(key),
            notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fetcher::HttpFeedFetcher;
    use crate::storage::cooldown::MemoryCooldownStore;
    use crate::testing::{feed, memory_pool, serve_once, RecordingNotifier, ScriptedFetcher};
    use chrono::{Duration, TimeZone};

    /// 10:00 local (UTC+8) on 2026-05-04.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 2, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    async fn pipeline(
        responses: Vec<anyhow::Result<String>>,
        notifier: &RecordingNotifier,
    ) -> (Pipeline, SqlitePool) {
        pipeline_with(Box::new(ScriptedFetcher::new(responses)), notifier).await
    }

    async fn pipeline_with(
        fetcher: Box<dyn FeedFetcher>,
        notifier: &RecordingNotifier,
    ) -> (Pipeline, SqlitePool) {
        let pool = memory_pool().await.unwrap();
        let tracker = CooldownTracker::open(
            Box::new(MemoryCooldownStore::default()),
            Duration::hours(4),
        );
        let pipeline = Pipeline::new(
            fetcher,
            pool.clone(),
            tracker,
            Box::new(notifier.clone()),
        )
        .with_offset(FixedOffset::east_opt(8 * 3600).unwrap());
        (pipeline, pool)
    }

    async fn seed_gold(pool: &SqlitePool) {
        for (days_ago, price) in [(29, 700.0), (15, 690.0), (1, 685.0)] {
            prices::upsert(pool, today() - Duration::days(days_ago), MetalType::Gold, price)
                .await
                .unwrap();
        }
    }

    async fn row_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM daily_prices")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn new_low_sends_once_then_cooldown_suppresses() {
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) =
            pipeline(vec![feed("684", "7100"), feed("684", "7100")], &notifier).await;
        seed_gold(&pool).await;

        let first = pipeline.run_cycle(now()).await.unwrap();
        let gold = &first.metals[0];
        assert_eq!(gold.metal, MetalType::Gold);
        assert_eq!(gold.triggered.len(), 3);
        assert_eq!(gold.key.as_deref(), Some("gold_15day_30day_7day"));
        assert_eq!(gold.notification, NotifyOutcome::Sent);

        let second = pipeline
            .run_cycle(now() + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(second.metals[0].notification, NotifyOutcome::Suppressed);

        let calls = notifier.calls_for(MetalType::Gold);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            "[metalwatch] gold new low 684.00 (15day, 30day, 7day)"
        );
        let today_gold = prices::query(&pool, MetalType::Gold, today(), today())
            .await
            .unwrap();
        assert_eq!(today_gold.len(), 1);
        assert_eq!(today_gold[0].price, 684.0);
    }

    #[tokio::test]
    async fn triggers_past_cooldown_send_again() {
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) =
            pipeline(vec![feed("684", "7100"), feed("684", "7100")], &notifier).await;
        seed_gold(&pool).await;

        pipeline.run_cycle(now()).await.unwrap();
        let later = pipeline
            .run_cycle(now() + Duration::hours(4) + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(later.metals[0].notification, NotifyOutcome::Sent);
        assert_eq!(notifier.calls_for(MetalType::Gold).len(), 2);
    }

    #[tokio::test]
    async fn price_above_all_minima_does_not_notify() {
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) = pipeline(vec![feed("699", "7100")], &notifier).await;
        seed_gold(&pool).await;

        let report = pipeline.run_cycle(now()).await.unwrap();
        assert!(report.metals[0].triggered.is_empty());
        assert_eq!(report.metals[0].notification, NotifyOutcome::NotTriggered);
        assert!(notifier.calls_for(MetalType::Gold).is_empty());
    }

    #[tokio::test]
    async fn missing_silver_writes_nothing() {
        let notifier = RecordingNotifier::default();
        let text = "var hq_str_gds_AUTD=\"684,0,0\";".to_string();
        let (pipeline, pool) = pipeline(vec![Ok(text)], &notifier).await;

        let err = pipeline.run_cycle(now()).await.unwrap_err();
        assert!(matches!(err, CycleError::Parse(_)));
        assert_eq!(err.stage(), "parse");
        assert_eq!(row_count(&pool).await, 0);
        assert!(notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_aborts_before_store() {
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) = pipeline(
            vec![Err(anyhow::anyhow!("connection refused")), feed("684", "7100")],
            &notifier,
        )
        .await;

        let err = pipeline.run_cycle(now()).await.unwrap_err();
        assert!(matches!(err, CycleError::Fetch(_)));
        assert_eq!(row_count(&pool).await, 0);

        // The next tick proceeds normally.
        let report = pipeline.run_cycle(now()).await.unwrap();
        assert_eq!(report.date, today());
        assert_eq!(row_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn http_error_status_aborts_as_fetch_error() {
        let (url, server) = serve_once("503 Service Unavailable", &[], Vec::new())
            .await
            .unwrap();
        let fetcher = HttpFeedFetcher::new(
            url,
            "metalwatch-test",
            "http://localhost/",
            "en",
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) = pipeline_with(Box::new(fetcher), &notifier).await;

        let err = pipeline.run_cycle(now()).await.unwrap_err();
        assert!(matches!(err, CycleError::Fetch(_)));
        assert_eq!(err.stage(), "fetch");
        assert_eq!(row_count(&pool).await, 0);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_next_cycle() {
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) =
            pipeline(vec![feed("684", "7100"), feed("684", "7100")], &notifier).await;
        seed_gold(&pool).await;

        notifier.set_failing(true);
        let first = pipeline.run_cycle(now()).await.unwrap();
        assert!(matches!(first.metals[0].notification, NotifyOutcome::Failed(_)));

        notifier.set_failing(false);
        let second = pipeline
            .run_cycle(now() + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(second.metals[0].notification, NotifyOutcome::Sent);
        assert_eq!(notifier.calls_for(MetalType::Gold).len(), 1);
    }

    #[tokio::test]
    async fn silver_is_stored_scaled() {
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) = pipeline(vec![feed("684", "7123.4")], &notifier).await;

        let report = pipeline.run_cycle(now()).await.unwrap();
        assert_eq!(report.silver, 7.1234);
        let silver = prices::latest(&pool, MetalType::Silver).await.unwrap().unwrap();
        assert_eq!(silver.price, 7.1234);
        assert_eq!(silver.date, today());
    }

    #[tokio::test]
    async fn acquire_does_not_touch_the_store() {
        let notifier = RecordingNotifier::default();
        let (pipeline, pool) = pipeline(vec![feed("684", "7100")], &notifier).await;

        let quote = pipeline.acquire().await.unwrap();
        assert_eq!(quote, Quote { gold: 684.0, silver: 7.1 });
        assert_eq!(row_count(&pool).await, 0);
    }
}
