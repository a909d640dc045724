/// SIGINT or SIGTERM, whichever comes first. Handlers are registered in `install`, so a signal
/// delivered after it returns is not lost.
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn install() -> anyhow::Result<Self> {
        #[cfg(unix)]
        {
            use anyhow::Context;
            use tokio::signal::unix::{signal, SignalKind};

            let terminate =
                signal(SignalKind::terminate()).context("install SIGTERM handler")?;
            Ok(Self { terminate })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Resolves with the name of the signal received.
    #[cfg_attr(not(unix), allow(unused_mut))]
    pub async fn recv(mut self) -> &'static str {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "SIGINT handler unavailable");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await;
            "SIGINT"
        }
    }
}
