pub mod alert;
pub mod analytics;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod shutdown;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod time;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::str::FromStr;

    const DEFAULT_DATABASE_URL: &str = "sqlite://data/metalwatch.db";
    const DEFAULT_FEED_URL: &str = "http://res.huangjinjiage.com.cn/jin.js";
    const DEFAULT_FEED_REFERER: &str = "http://www.huangjinjiage.cn/";
    const DEFAULT_FEED_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: String,
        pub sentry_dsn: Option<String>,

        pub feed_url: String,
        pub feed_referer: String,
        pub feed_user_agent: String,
        pub feed_accept_language: String,
        pub feed_timeout_secs: u64,
        /// Charset label used when the response carries no `charset=` parameter.
        pub feed_encoding: String,

        pub gold_quote_key: String,
        pub silver_quote_key: String,
        pub silver_price_divisor: f64,

        /// Trailing windows in days, e.g. `[7, 15, 30]`.
        pub alert_windows: Vec<u32>,
        pub cooldown_hours: i64,
        pub cooldown_state_path: PathBuf,
        pub notify_webhook_url: Option<String>,

        pub schedule_period_minutes: u32,
        pub schedule_jitter_secs: u32,
        pub schedule_start_hour: u32,
        pub schedule_end_hour: u32,
        /// Offset of the feed's local time. Defines both "today" and the daily run window.
        pub market_utc_offset_hours: i32,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let settings = Self {
                database_url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
                sentry_dsn: env_opt("SENTRY_DSN"),

                feed_url: env_or("FEED_URL", DEFAULT_FEED_URL),
                feed_referer: env_or("FEED_REFERER", DEFAULT_FEED_REFERER),
                feed_user_agent: env_or("FEED_USER_AGENT", DEFAULT_FEED_USER_AGENT),
                feed_accept_language: env_or("FEED_ACCEPT_LANGUAGE", "en"),
                feed_timeout_secs: env_parse("FEED_TIMEOUT_SECS", 10)?,
                feed_encoding: env_or("FEED_ENCODING", "GBK"),

                gold_quote_key: env_or("GOLD_QUOTE_KEY", "hq_str_gds_AUTD"),
                silver_quote_key: env_or("SILVER_QUOTE_KEY", "hq_str_gds_AGTD"),
                silver_price_divisor: env_parse("SILVER_PRICE_DIVISOR", 1000.0)?,

                alert_windows: parse_windows(&env_or("ALERT_WINDOWS", "7,15,30"))?,
                cooldown_hours: env_parse("COOLDOWN_HOURS", 4)?,
                cooldown_state_path: PathBuf::from(env_or(
                    "COOLDOWN_STATE_PATH",
                    "data/alert_cooldown.json",
                )),
                notify_webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),

                schedule_period_minutes: env_parse("SCHEDULE_PERIOD_MINUTES", 20)?,
                schedule_jitter_secs: env_parse("SCHEDULE_JITTER_SECS", 1200)?,
                schedule_start_hour: env_parse("SCHEDULE_START_HOUR", 8)?,
                schedule_end_hour: env_parse("SCHEDULE_END_HOUR", 21)?,
                market_utc_offset_hours: env_parse("MARKET_UTC_OFFSET_HOURS", 8)?,
            };
            settings.validate()?;
            Ok(settings)
        }

        fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(
                self.schedule_start_hour <= self.schedule_end_hour && self.schedule_end_hour <= 23,
                "SCHEDULE_START_HOUR..=SCHEDULE_END_HOUR must be within 0..=23 (got {}..={})",
                self.schedule_start_hour,
                self.schedule_end_hour
            );
            anyhow::ensure!(
                self.schedule_period_minutes >= 1,
                "SCHEDULE_PERIOD_MINUTES must be >= 1"
            );
            anyhow::ensure!(
                (-14..=14).contains(&self.market_utc_offset_hours),
                "MARKET_UTC_OFFSET_HOURS must be within -14..=14 (got {})",
                self.market_utc_offset_hours
            );
            anyhow::ensure!(self.cooldown_hours >= 0, "COOLDOWN_HOURS must be >= 0");
            anyhow::ensure!(
                self.silver_price_divisor > 0.0,
                "SILVER_PRICE_DIVISOR must be > 0"
            );
            anyhow::ensure!(self.feed_timeout_secs >= 1, "FEED_TIMEOUT_SECS must be >= 1");
            Ok(())
        }

        pub fn market_offset(&self) -> anyhow::Result<chrono::FixedOffset> {
            chrono::FixedOffset::east_opt(self.market_utc_offset_hours * 3600)
                .context("invalid MARKET_UTC_OFFSET_HOURS")
        }
    }

    fn env_opt(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    fn env_or(key: &str, default: &str) -> String {
        env_opt(key).unwrap_or_else(|| default.to_string())
    }

    fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env_opt(key) {
            Some(s) => s
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{key} is invalid ({s:?}): {e}")),
            None => Ok(default),
        }
    }

    fn parse_windows(s: &str) -> anyhow::Result<Vec<u32>> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let days = part
                .parse::<u32>()
                .with_context(|| format!("ALERT_WINDOWS entry is not a day count: {part:?}"))?;
            anyhow::ensure!(days >= 1, "ALERT_WINDOWS entries must be >= 1");
            if !out.contains(&days) {
                out.push(days);
            }
        }
        anyhow::ensure!(!out.is_empty(), "ALERT_WINDOWS must name at least one window");
        Ok(out)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_window_list_and_drops_duplicates() {
            assert_eq!(parse_windows("7, 15,30,7").unwrap(), vec![7, 15, 30]);
        }

        #[test]
        fn rejects_bad_window_entries() {
            assert!(parse_windows("7,abc").is_err());
            assert!(parse_windows("0").is_err());
            assert!(parse_windows(" , ").is_err());
        }
    }
}
