use crate::domain::price::MetalType;
use serde::{Deserialize, Serialize};

/// A trailing N-day lookback, inclusive of today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertWindow {
    pub name: String,
    pub days: u32,
}

impl AlertWindow {
    pub fn days(days: u32) -> Self {
        Self {
            name: format!("{days}day"),
            days,
        }
    }

    pub fn from_day_counts(counts: &[u32]) -> Vec<Self> {
        counts.iter().copied().map(Self::days).collect()
    }
}

pub fn default_windows() -> Vec<AlertWindow> {
    AlertWindow::from_day_counts(&[7, 15, 30])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub metal_type: MetalType,
    pub window_name: String,
    pub current_price: f64,
    pub window_min_price: f64,
}

/// Identity of one notification: the metal plus the sorted set of windows that fired together.
pub fn cooldown_key(metal: MetalType, events: &[AlertEvent]) -> String {
    let mut names: Vec<&str> = events.iter().map(|e| e.window_name.as_str()).collect();
    names.sort_unstable();
    names.dedup();

    let mut key = metal.as_str().to_string();
    for name in names {
        key.push('_');
        key.push_str(name);
    }
    key
}
