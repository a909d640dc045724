use chrono::{DateTime, Utc};
use metalwatch_core::pipeline::{NotifyOutcome, Pipeline};
use metalwatch_core::time::schedule::Cadence;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// Single job slot. `tick` takes `&mut self`, so two cycles can never overlap.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    cadence: Cadence,
    state: JobState,
    /// Nominal slot of the last scheduled run.
    last_nominal: Option<DateTime<Utc>>,
    rng: StdRng,
    clock: fn() -> DateTime<Utc>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, cadence: Cadence) -> Self {
        Self {
            pipeline,
            cadence,
            state: JobState::Idle,
            last_nominal: None,
            rng: StdRng::from_entropy(),
            clock: Utc::now,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Runs one cycle immediately (ignoring the daily window), then follows the cadence until
    /// `shutdown` flips. An in-flight cycle always completes first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        tracing::info!("running initial cycle");
        self.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = (self.clock)();
            let firing = self
                .cadence
                .next_fire(self.last_nominal, now, &mut self.rng)?;
            let wait = wait_until(now, firing.at);
            tracing::info!(
                nominal = %firing.nominal,
                fire_at = %firing.at,
                wait_secs = wait.as_secs(),
                "next cycle scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.last_nominal = Some(firing.nominal);
            self.tick().await;
        }

        tracing::info!(state = ?self.state(), "scheduler stopped");
        Ok(())
    }

    /// One isolated cycle. Errors and panics are logged here and never escape.
    pub async fn tick(&mut self) -> bool {
        debug_assert_eq!(self.state, JobState::Idle);
        self.state = JobState::Running;
        let started = Instant::now();

        let pipeline = Arc::clone(&self.pipeline);
        let now = (self.clock)();
        let handle = tokio::spawn(async move { pipeline.run_cycle(now).await });

        let ok = match handle.await {
            Ok(Ok(report)) => {
                for m in &report.metals {
                    let windows: Vec<&str> =
                        m.triggered.iter().map(|e| e.window_name.as_str()).collect();
                    tracing::info!(
                        date = %report.date,
                        metal = %m.metal,
                        price = m.price,
                        triggered = ?windows,
                        notification = ?m.notification,
                        "cycle metal outcome"
                    );
                }
                let failed = report
                    .metals
                    .iter()
                    .filter(|m| matches!(m.notification, NotifyOutcome::Failed(_)))
                    .count();
                tracing::info!(
                    date = %report.date,
                    gold = report.gold,
                    silver = report.silver,
                    failed_notifications = failed,
                    elapsed_ms = started.elapsed().as_millis(),
                    "cycle complete"
                );
                true
            }
            Ok(Err(err)) => {
                tracing::error!(
                    stage = err.stage(),
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis(),
                    "cycle aborted"
                );
                sentry_anyhow::capture_anyhow(&anyhow::Error::new(err));
                false
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "cycle task panicked");
                false
            }
        };

        self.state = JobState::Idle;
        ok
    }
}

fn wait_until(now: DateTime<Utc>, fire_at: DateTime<Utc>) -> Duration {
    fire_at
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
