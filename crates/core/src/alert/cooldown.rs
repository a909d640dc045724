use crate::storage::cooldown::{CooldownState, CooldownStore};
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_COOLDOWN_HOURS: i64 = 4;

/// Suppresses repeat notifications for the same alert key inside `cooldown`.
pub struct CooldownTracker {
    store: Box<dyn CooldownStore>,
    cooldown: Duration,
    state: CooldownState,
}

impl CooldownTracker {
    /// Unreadable state is treated as "nothing sent yet".
    pub fn open(store: Box<dyn CooldownStore>, cooldown: Duration) -> Self {
        let state = match store.load() {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, "cooldown state unreadable; starting empty");
                CooldownState::new()
            }
        };
        tracing::debug!(entries = state.len(), "cooldown state loaded");
        Self {
            store,
            cooldown,
            state,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_sent(&self, key: &str) -> Option<DateTime<Utc>> {
        self.state.get(key).copied()
    }

    pub fn should_send(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.state.get(key) {
            None => true,
            Some(last) => now.signed_duration_since(*last) >= self.cooldown,
        }
    }

    /// Call only after the notification was confirmed delivered.
    pub fn record_sent(&mut self, key: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.state.insert(key.to_string(), at);
        self.store.save(&self.state)?;

        match self.store.load() {
            Ok(reloaded) => self.state = reloaded,
            Err(err) => {
                tracing::warn!(
                    key,
                    error = %err,
                    "cooldown state reload failed; keeping in-memory copy"
                );
            }
        }
        Ok(())
    }
}
