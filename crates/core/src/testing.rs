//! In-process doubles for the feed, the notifier and the database, shared by the crates'
//! tests. Enabled for this crate's own tests and behind the `testing` feature for the others.

use crate::domain::alert::AlertEvent;
use crate::domain::price::MetalType;
use crate::ingest::fetcher::{FeedFetcher, RawFeed};
use crate::notify::Notifier;
use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Migrated in-memory database.
pub async fn memory_pool() -> anyhow::Result<SqlitePool> {
    // Every in-memory connection is its own database, so pin the pool to one.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("open in-memory database")?;
    crate::storage::migrate(&pool).await?;
    Ok(pool)
}

/// Feed body in the upstream format carrying both default quote keys.
pub fn feed(gold: &str, silver: &str) -> anyhow::Result<String> {
    Ok(format!(
        "var hq_str_gds_AUTD=\"{gold},0,0\";\nvar hq_str_gds_AGTD=\"{silver},0,0\";"
    ))
}

/// Replays canned responses in order, then fails.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    responses: Arc<Mutex<VecDeque<anyhow::Result<String>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new(responses: Vec<anyhow::Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self) -> anyhow::Result<RawFeed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted response")));
        next.map(|text| RawFeed {
            bytes: text.into_bytes(),
            declared_charset: Some("utf-8".to_string()),
        })
    }
}

pub type RecordedAlert = (String, MetalType, Vec<AlertEvent>);

/// Keeps every delivered alert. Can be switched to fail deliveries.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    calls: Arc<Mutex<Vec<RecordedAlert>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedAlert> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, metal: MetalType) -> Vec<RecordedAlert> {
        self.calls()
            .into_iter()
            .filter(|(_, m, _)| *m == metal)
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(
        &self,
        subject: &str,
        metal: MetalType,
        triggered: &[AlertEvent],
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("transport down");
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subject.to_string(), metal, triggered.to_vec()));
        Ok(())
    }
}

/// Local HTTP/1.1 server answering exactly one request with `status` (e.g. `"503 Service
/// Unavailable"`). Returns the base URL and a handle resolving to the raw request head.
pub async fn serve_once(
    status: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> anyhow::Result<(String, JoinHandle<anyhow::Result<String>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind local server")?;
    let addr = listener.local_addr()?;

    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    let mut response = response.into_bytes();
    response.extend_from_slice(&body);

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.context("accept")?;
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.context("read request")?;
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        stream.write_all(&response).await.context("write response")?;
        stream.shutdown().await.ok();
        Ok(String::from_utf8_lossy(&request).into_owned())
    });

    Ok((format!("http://{addr}"), handle))
}
