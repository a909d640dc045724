use crate::config::Settings;
use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use rand::Rng;

/// Nominal slots every `period` from `start_hour:00` through `end_hour:59:59` local time,
/// each fired at an independently drawn offset in `[-jitter, +jitter]`.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    jitter_secs: i64,
    start_hour: u32,
    end_hour: u32,
    offset: FixedOffset,
}

/// A planned run: the nominal slot and the jittered instant it fires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    pub nominal: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

impl Cadence {
    pub fn new(
        period: Duration,
        jitter: Duration,
        start_hour: u32,
        end_hour: u32,
        offset: FixedOffset,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(period > Duration::zero(), "schedule period must be positive");
        anyhow::ensure!(
            start_hour <= end_hour && end_hour <= 23,
            "schedule hours must satisfy start <= end <= 23 (got {start_hour}..={end_hour})"
        );
        Ok(Self {
            period,
            jitter_secs: jitter.num_seconds().abs(),
            start_hour,
            end_hour,
            offset,
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(
            Duration::minutes(i64::from(settings.schedule_period_minutes)),
            Duration::seconds(i64::from(settings.schedule_jitter_secs)),
            settings.schedule_start_hour,
            settings.schedule_end_hour,
            settings.market_offset()?,
        )
    }

    /// Window bounds of local `day`, in UTC.
    fn window_bounds(&self, day: NaiveDate) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = NaiveTime::from_hms_opt(self.start_hour, 0, 0).context("invalid start hour")?;
        let end = NaiveTime::from_hms_opt(self.end_hour, 59, 59).context("invalid end hour")?;
        let start = self
            .offset
            .from_local_datetime(&day.and_time(start))
            .single()
            .context("ambiguous window start")?;
        let end = self
            .offset
            .from_local_datetime(&day.and_time(end))
            .single()
            .context("ambiguous window end")?;
        Ok((start.with_timezone(&Utc), end.with_timezone(&Utc)))
    }

    /// First nominal slot strictly after `after`.
    pub fn next_nominal(&self, after: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        let local_day = after.with_timezone(&self.offset).date_naive();
        let period_secs = self.period.num_seconds().max(1);

        for day_offset in 0..=1 {
            let day = local_day + Duration::days(day_offset);
            let (start, end) = self.window_bounds(day)?;

            let slot = if after < start {
                start
            } else {
                let elapsed = after.signed_duration_since(start).num_seconds();
                start + Duration::seconds((elapsed / period_secs + 1) * period_secs)
            };
            if slot <= end {
                return Ok(slot);
            }
        }
        anyhow::bail!("no schedule slot found after {after}")
    }

    /// Next slot to run given the last nominal slot already fired, jittered and clamped into
    /// that slot's daily window. Never earlier than `now`. Each slot fires at most once; a slot
    /// whose whole jitter range is already behind `now` is skipped.
    pub fn next_fire<R: Rng>(
        &self,
        last_nominal: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> anyhow::Result<Firing> {
        let after = match last_nominal {
            Some(last) => last.max(now - Duration::seconds(self.jitter_secs)),
            None => now,
        };
        let nominal = self.next_nominal(after)?;
        let jitter = rng.gen_range(-self.jitter_secs..=self.jitter_secs);
        let jittered = nominal + Duration::seconds(jitter);

        let (start, end) = self.window_bounds(nominal.with_timezone(&self.offset).date_naive())?;
        let at = jittered.clamp(start, end).max(now);
        Ok(Firing { nominal, at })
    }
}
