use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metalwatch_core::analytics::{self, RangeStats, WindowStats};
use metalwatch_core::domain::alert::AlertWindow;
use metalwatch_core::domain::price::{DailyPriceRecord, MetalType};
use metalwatch_core::shutdown::ShutdownSignal;
use metalwatch_core::storage::prices;

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

    // The worker owns the schema; the API never creates or migrates the database.
    let pool: Option<SqlitePool> =
        match metalwatch_core::storage::connect_read_only(&settings.database_url).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db connect failed; starting API in degraded mode");
                None
            }
        };

    let state = AppState {
        pool,
        offset: settings.market_offset()?,
        windows: AlertWindow::from_day_counts(&settings.alert_windows),
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let shutdown = ShutdownSignal::install()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let signal = shutdown.recv().await;
            tracing::info!(signal, "shutdown requested");
        })
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/prices/:metal", get(get_price_range))
        .route("/prices/:metal/latest", get(get_latest_price))
        .route("/prices/:metal/windows", get(get_window_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<SqlitePool>,
    offset: FixedOffset,
    windows: Vec<AlertWindow>,
}

impl AppState {
    fn pool(&self) -> Result<&SqlitePool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }

    fn today(&self) -> NaiveDate {
        metalwatch_core::time::market_date(Utc::now(), self.offset)
    }
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiPriceRange {
    metal: MetalType,
    start_date: NaiveDate,
    end_date: NaiveDate,
    stats: RangeStats,
    records: Vec<DailyPriceRecord>,
}

#[derive(Debug, Serialize)]
struct ApiWindows {
    metal: MetalType,
    as_of_date: NaiveDate,
    windows: Vec<WindowStats>,
}

fn parse_metal(s: &str) -> Result<MetalType, StatusCode> {
    s.parse::<MetalType>().map_err(|_| StatusCode::NOT_FOUND)
}

fn parse_date(s: Option<&str>) -> Result<Option<NaiveDate>, StatusCode> {
    s.map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST))
        .transpose()
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_latest_price(
    State(state): State<AppState>,
    Path(metal): Path<String>,
) -> Result<Json<DailyPriceRecord>, StatusCode> {
    let pool = state.pool()?;
    let metal = parse_metal(&metal)?;

    let record = prices::latest(pool, metal)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(record))
}

/// Defaults to the trailing 30 days ending today.
async fn get_price_range(
    State(state): State<AppState>,
    Path(metal): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<ApiPriceRange>, StatusCode> {
    let pool = state.pool()?;
    let metal = parse_metal(&metal)?;

    let end_date = parse_date(params.end_date.as_deref())?.unwrap_or_else(|| state.today());
    let start_date = parse_date(params.start_date.as_deref())?
        .unwrap_or_else(|| analytics::window_start(end_date, 30));
    if start_date > end_date {
        return Err(StatusCode::BAD_REQUEST);
    }

    let records = prices::query(pool, metal, start_date, end_date)
        .await
        .map_err(internal)?;

    Ok(Json(ApiPriceRange {
        metal,
        start_date,
        end_date,
        stats: analytics::range_stats(&records),
        records,
    }))
}

async fn get_window_stats(
    State(state): State<AppState>,
    Path(metal): Path<String>,
) -> Result<Json<ApiWindows>, StatusCode> {
    let pool = state.pool()?;
    let metal = parse_metal(&metal)?;
    let as_of_date = state.today();

    let windows = analytics::all_window_stats(pool, metal, as_of_date, &state.windows)
        .await
        .map_err(internal)?;

    Ok(Json(ApiWindows {
        metal,
        as_of_date,
        windows,
    }))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metal_path_segment_is_validated() {
        assert_eq!(parse_metal("gold"), Ok(MetalType::Gold));
        assert_eq!(parse_metal("SILVER"), Ok(MetalType::Silver));
        assert_eq!(parse_metal("copper"), Err(StatusCode::NOT_FOUND));
    }

    #[test]
    fn dates_are_optional_but_must_be_iso() {
        assert_eq!(parse_date(None), Ok(None));
        assert_eq!(
            parse_date(Some("2026-05-04")),
            Ok(NaiveDate::from_ymd_opt(2026, 5, 4))
        );
        assert_eq!(parse_date(Some("05/04/2026")), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn degraded_state_reports_unavailable() {
        let state = AppState {
            pool: None,
            offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            windows: Vec::new(),
        };
        assert_eq!(state.pool().err(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }
}
