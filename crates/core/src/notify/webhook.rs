use crate::domain::alert::AlertEvent;
use crate::domain::price::MetalType;
use crate::notify::{body, Notifier};
use anyhow::Context;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// POSTs a JSON alert to a fixed URL; any non-2xx response is a failed delivery.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    metal: MetalType,
    body: String,
    windows: Vec<WebhookWindow<'a>>,
}

#[derive(Debug, Serialize)]
struct WebhookWindow<'a> {
    name: &'a str,
    current_price: f64,
    window_min_price: f64,
}

fn payload<'a>(subject: &'a str, metal: MetalType, triggered: &'a [AlertEvent]) -> WebhookPayload<'a> {
    WebhookPayload {
        subject,
        metal,
        body: body(triggered),
        windows: triggered
            .iter()
            .map(|e| WebhookWindow {
                name: &e.window_name,
                current_price: e.current_price,
                window_min_price: e.window_min_price,
            })
            .collect(),
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(
        &self,
        subject: &str,
        metal: MetalType,
        triggered: &[AlertEvent],
    ) -> anyhow::Result<()> {
        let res = self
            .http
            .post(&self.url)
            .json(&payload(subject, metal, triggered))
            .send()
            .await
            .context("webhook request failed")?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("webhook HTTP {status}: {text}");
        }
        Ok(())
    }
}
