pub mod cooldown;

use crate::analytics::{window_start, window_stats_in};
use crate::domain::alert::{AlertEvent, AlertWindow};
use crate::domain::price::{DailyPriceRecord, MetalType};
use crate::storage::prices;
use chrono::NaiveDate;
use sqlx::SqlitePool;

/// One event per window whose minimum (including today's stored price) is >= `current_price`.
///
/// A flat price sitting on the running minimum fires every cycle; deduplication is the
/// cooldown tracker's job.
pub fn evaluate_records(
    metal: MetalType,
    current_price: f64,
    today: NaiveDate,
    windows: &[AlertWindow],
    records: &[DailyPriceRecord],
) -> Vec<AlertEvent> {
    let mut events = Vec::new();
    for window in windows {
        let stats = window_stats_in(records, today, window.days);
        let Some(window_min) = stats.min else {
            continue;
        };
        if current_price <= window_min {
            events.push(AlertEvent {
                metal_type: metal,
                window_name: window.name.clone(),
                current_price,
                window_min_price: window_min,
            });
        }
    }
    events
}

/// Loads the longest window once and evaluates every window against it.
pub async fn evaluate(
    pool: &SqlitePool,
    metal: MetalType,
    current_price: f64,
    today: NaiveDate,
    windows: &[AlertWindow],
) -> anyhow::Result<Vec<AlertEvent>> {
    let longest = windows.iter().map(|w| w.days).max().unwrap_or(1);
    let records = prices::query(pool, metal, window_start(today, longest), today).await?;
    Ok(evaluate_records(metal, current_price, today, windows, &records))
}
