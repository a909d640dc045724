use crate::domain::alert::AlertWindow;
use crate::domain::price::{DailyPriceRecord, MetalType};
use crate::storage::prices;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sqlx::SqlitePool;

/// `None` in either field means "not available" (empty record set).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeStats {
    pub avg: Option<f64>,
    pub min: Option<f64>,
}

impl RangeStats {
    pub const NOT_AVAILABLE: RangeStats = RangeStats {
        avg: None,
        min: None,
    };

    pub fn is_available(&self) -> bool {
        self.min.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub window: AlertWindow,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(flatten)]
    pub stats: RangeStats,
}

/// Average rounded to 2 places; minimum at stored precision.
pub fn range_stats(records: &[DailyPriceRecord]) -> RangeStats {
    if records.is_empty() {
        return RangeStats::NOT_AVAILABLE;
    }

    let sum: f64 = records.iter().map(|r| r.price).sum();
    let min = records
        .iter()
        .map(|r| r.price)
        .fold(f64::INFINITY, f64::min);

    RangeStats {
        avg: Some(round2(sum / records.len() as f64)),
        min: Some(min),
    }
}

/// First day of a `days`-long window ending at `as_of` (inclusive).
pub fn window_start(as_of: NaiveDate, days: u32) -> NaiveDate {
    as_of - Duration::days(i64::from(days.max(1)) - 1)
}

/// Stats over the slice of `records` falling in the window ending at `as_of`.
pub fn window_stats_in(records: &[DailyPriceRecord], as_of: NaiveDate, days: u32) -> RangeStats {
    let start = window_start(as_of, days);
    let in_window: Vec<DailyPriceRecord> = records
        .iter()
        .filter(|r| r.date >= start && r.date <= as_of)
        .cloned()
        .collect();
    range_stats(&in_window)
}

pub async fn window_stats(
    pool: &SqlitePool,
    metal: MetalType,
    as_of: NaiveDate,
    days: u32,
) -> anyhow::Result<RangeStats> {
    let records = prices::query(pool, metal, window_start(as_of, days), as_of).await?;
    Ok(range_stats(&records))
}

/// Stats for every window from a single range query covering the longest one.
pub async fn all_window_stats(
    pool: &SqlitePool,
    metal: MetalType,
    as_of: NaiveDate,
    windows: &[AlertWindow],
) -> anyhow::Result<Vec<WindowStats>> {
    let longest = windows.iter().map(|w| w.days).max().unwrap_or(1);
    let records = prices::query(pool, metal, window_start(as_of, longest), as_of).await?;

    Ok(windows
        .iter()
        .map(|w| WindowStats {
            window: w.clone(),
            start_date: window_start(as_of, w.days),
            end_date: as_of,
            stats: window_stats_in(&records, as_of, w.days),
        })
        .collect())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
