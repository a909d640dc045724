use crate::config::Settings;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, GBK};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, USER_AGENT};
use std::time::Duration;

/// Raw feed body plus whatever charset the response declared.
#[derive(Debug, Clone)]
pub struct RawFeed {
    pub bytes: Vec<u8>,
    pub declared_charset: Option<String>,
}

impl RawFeed {
    /// Decodes with the declared charset when it is a known label, otherwise with `fallback`.
    pub fn decode(&self, fallback: &str) -> String {
        let encoding = self
            .declared_charset
            .as_deref()
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .or_else(|| Encoding::for_label(fallback.as_bytes()))
            .unwrap_or(GBK);

        let (text, _, had_errors) = encoding.decode(&self.bytes);
        if had_errors {
            tracing::warn!(
                encoding = encoding.name(),
                bytes = self.bytes.len(),
                "feed body contained malformed sequences"
            );
        }
        text.into_owned()
    }
}

/// One GET against the quote feed. Retries are the scheduler's job.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self) -> Result<RawFeed>;
}

#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    http: reqwest::Client,
    url: String,
}

impl HttpFeedFetcher {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.feed_url.clone(),
            &settings.feed_user_agent,
            &settings.feed_referer,
            &settings.feed_accept_language,
            Duration::from_secs(settings.feed_timeout_secs),
        )
    }

    pub fn new(
        url: impl Into<String>,
        user_agent: &str,
        referer: &str,
        accept_language: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).context("invalid FEED_USER_AGENT")?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(referer).context("invalid FEED_REFERER")?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(accept_language).context("invalid FEED_ACCEPT_LANGUAGE")?,
        );

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build feed http client")?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self) -> Result<RawFeed> {
        let t = cache_buster(Utc::now());
        tracing::debug!(url = %self.url, t, "fetching quote feed");

        let res = self
            .http
            .get(&self.url)
            .query(&[("t", t)])
            .send()
            .await
            .context("feed request failed")?;

        let status = res.status();
        if !status.is_success() {
            anyhow::bail!("feed HTTP {status}");
        }

        let declared_charset = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);

        let bytes = res
            .bytes()
            .await
            .context("failed to read feed response")?
            .to_vec();

        Ok(RawFeed {
            bytes,
            declared_charset,
        })
    }
}

fn cache_buster(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis()
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;
    use chrono::TimeZone;

    fn fetcher(url: &str, timeout: Duration) -> HttpFeedFetcher {
        HttpFeedFetcher::new(url, "metalwatch-test", "http://www.huangjinjiage.cn/", "en", timeout)
            .unwrap()
    }

    #[tokio::test]
    async fn sends_cache_buster_and_static_headers() {
        let (body, _, _) = GBK.encode("var hq_str_gds_AUTD=\"680.50,0\"; // 黄金");
        let (url, server) = serve_once(
            "200 OK",
            &[("Content-Type", "application/javascript; charset=GBK")],
            body.into_owned(),
        )
        .await
        .unwrap();

        let raw = fetcher(&format!("{url}/jin.js"), Duration::from_secs(5))
            .fetch()
            .await
            .unwrap();
        assert_eq!(raw.declared_charset.as_deref(), Some("GBK"));
        assert_eq!(raw.decode("utf-8"), "var hq_str_gds_AUTD=\"680.50,0\"; // 黄金");

        let request = server.await.unwrap().unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /jin.js?t="), "{request}");
        assert!(request.contains("user-agent: metalwatch-test"));
        assert!(request.contains("referer: http://www.huangjinjiage.cn/"));
        assert!(request.contains("accept-language: en"));
    }

    #[tokio::test]
    async fn non_success_status_fails() {
        let (url, server) = serve_once("503 Service Unavailable", &[], Vec::new())
            .await
            .unwrap();

        let err = fetcher(&url, Duration::from_secs(5)).fetch().await.unwrap_err();
        assert!(format!("{err:#}").contains("503"), "{err:#}");
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = fetcher(&url, Duration::from_millis(200))
            .fetch()
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("feed request failed"), "{err:#}");
        server.abort();
    }

    #[test]
    fn extracts_charset_parameter() {
        assert_eq!(
            charset_from_content_type("application/javascript; charset=GBK").as_deref(),
            Some("GBK")
        );
        assert_eq!(
            charset_from_content_type("text/plain;Charset=\"utf-8\"").as_deref(),
            Some("utf-8")
        );
        assert_eq!(charset_from_content_type("application/javascript"), None);
        assert_eq!(charset_from_content_type("text/plain; charset="), None);
    }

    #[test]
    fn decodes_with_fallback_when_nothing_declared() {
        let (bytes, _, _) = GBK.encode("黄金 680.50");
        let feed = RawFeed {
            bytes: bytes.into_owned(),
            declared_charset: None,
        };
        assert_eq!(feed.decode("GBK"), "黄金 680.50");
    }

    #[test]
    fn declared_charset_wins_over_fallback() {
        let feed = RawFeed {
            bytes: "白银".as_bytes().to_vec(),
            declared_charset: Some("utf-8".to_string()),
        };
        assert_eq!(feed.decode("GBK"), "白银");
    }

    #[test]
    fn unknown_declared_label_falls_back() {
        let (bytes, _, _) = GBK.encode("白银");
        let feed = RawFeed {
            bytes: bytes.into_owned(),
            declared_charset: Some("x-not-a-charset".to_string()),
        };
        assert_eq!(feed.decode("gbk"), "白银");
    }

    #[test]
    fn cache_buster_is_millisecond_epoch() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        assert_eq!(cache_buster(now), 1_767_600_000_000);
    }
}
