pub mod webhook;

use crate::config::Settings;
use crate::domain::alert::AlertEvent;
use crate::domain::price::MetalType;

/// Delivery of one alert. How it is delivered is up to the implementation.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(
        &self,
        subject: &str,
        metal: MetalType,
        triggered: &[AlertEvent],
    ) -> anyhow::Result<()>;
}

/// Writes alerts to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(
        &self,
        subject: &str,
        metal: MetalType,
        triggered: &[AlertEvent],
    ) -> anyhow::Result<()> {
        tracing::warn!(%metal, windows = triggered.len(), "{subject}\n{}", body(triggered));
        Ok(())
    }
}

pub fn from_settings(settings: &Settings) -> anyhow::Result<Box<dyn Notifier>> {
    match settings.notify_webhook_url.as_deref() {
        Some(url) => Ok(Box::new(webhook::WebhookNotifier::new(url)?)),
        None => Ok(Box::new(LogNotifier)),
    }
}

pub fn subject(metal: MetalType, triggered: &[AlertEvent]) -> String {
    let price = triggered.first().map(|e| e.current_price).unwrap_or_default();
    let mut names: Vec<&str> = triggered.iter().map(|e| e.window_name.as_str()).collect();
    names.sort_unstable();
    format!(
        "[metalwatch] {metal} new low {price:.2} ({})",
        names.join(", ")
    )
}

pub fn body(triggered: &[AlertEvent]) -> String {
    triggered
        .iter()
        .map(|e| {
            format!(
                "{} {}: current {} <= window min {}",
                e.metal_type, e.window_name, e.current_price, e.window_min_price
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(window: &str) -> AlertEvent {
        AlertEvent {
            metal_type: MetalType::Gold,
            window_name: window.to_string(),
            current_price: 684.0,
            window_min_price: 684.0,
        }
    }

    #[test]
    fn subject_names_metal_price_and_sorted_windows() {
        let events = vec![event("7day"), event("15day"), event("30day")];
        assert_eq!(
            subject(MetalType::Gold, &events),
            "[metalwatch] gold new low 684.00 (15day, 30day, 7day)"
        );
    }

    #[test]
    fn body_has_one_line_per_window() {
        let events = vec![event("7day"), event("15day")];
        let body = body(&events);
        assert_eq!(body.lines().count(), 2);
        assert!(body.starts_with("gold 7day: current 684 <= window min 684"));
    }
}
