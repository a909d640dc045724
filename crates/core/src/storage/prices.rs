use crate::domain::price::{DailyPriceRecord, MetalType};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;

/// Writes every (metal, price) pair for `date` in one transaction. Any failing row rolls back
/// the whole set, so readers never see half of a cycle.
pub async fn upsert_cycle(
    pool: &SqlitePool,
    date: NaiveDate,
    prices: &[(MetalType, f64)],
) -> anyhow::Result<u64> {
    anyhow::ensure!(!prices.is_empty(), "prices must be non-empty");

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let updated_at = Utc::now();

    let mut affected: u64 = 0;
    for (metal, price) in prices {
        let res = sqlx::query(
            "INSERT INTO daily_prices (date, metal_type, price, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (date, metal_type) DO UPDATE \
               SET price = excluded.price, updated_at = excluded.updated_at",
        )
        .bind(date)
        .bind(metal.as_str())
        .bind(price)
        .bind(updated_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("upsert daily_prices failed (date={date}, metal={metal})"))?;
        affected += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;

    tracing::debug!(%date, rows = affected, "daily_prices upserted");
    Ok(affected)
}

pub async fn upsert(
    pool: &SqlitePool,
    date: NaiveDate,
    metal: MetalType,
    price: f64,
) -> anyhow::Result<()> {
    upsert_cycle(pool, date, &[(metal, price)]).await?;
    Ok(())
}

/// Records for `metal` with `start <= date <= end`, oldest first.
pub async fn query(
    pool: &SqlitePool,
    metal: MetalType,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<DailyPriceRecord>> {
    let rows = sqlx::query_as::<_, (NaiveDate, f64)>(
        "SELECT date, price \
         FROM daily_prices \
         WHERE metal_type = ?1 AND date >= ?2 AND date <= ?3 \
         ORDER BY date ASC",
    )
    .bind(metal.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .with_context(|| format!("query daily_prices failed (metal={metal}, {start}..={end})"))?;

    Ok(rows
        .into_iter()
        .map(|(date, price)| DailyPriceRecord {
            date,
            metal_type: metal,
            price,
        })
        .collect())
}

pub async fn latest(
    pool: &SqlitePool,
    metal: MetalType,
) -> anyhow::Result<Option<DailyPriceRecord>> {
    let row = sqlx::query_as::<_, (NaiveDate, f64)>(
        "SELECT date, price \
         FROM daily_prices \
         WHERE metal_type = ?1 \
         ORDER BY date DESC \
         LIMIT 1",
    )
    .bind(metal.as_str())
    .fetch_optional(pool)
    .await
    .with_context(|| format!("query latest daily_prices failed (metal={metal})"))?;

    Ok(row.map(|(date, price)| DailyPriceRecord {
        date,
        metal_type: metal,
        price,
    }))
}
