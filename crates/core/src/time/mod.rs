pub mod schedule;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Calendar date at `now` in the feed's local time.
pub fn market_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn market_date_follows_local_midnight() {
        let cst = FixedOffset::east_opt(8 * 3600).unwrap();
        // 2026-01-04 16:30 UTC is already 2026-01-05 00:30 in UTC+8.
        let now = Utc.with_ymd_and_hms(2026, 1, 4, 16, 30, 0).unwrap();
        assert_eq!(market_date(now, cst), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());

        let earlier = Utc.with_ymd_and_hms(2026, 1, 4, 15, 59, 0).unwrap();
        assert_eq!(market_date(earlier, cst), NaiveDate::from_ymd_opt(2026, 1, 4).unwrap());
    }
}
