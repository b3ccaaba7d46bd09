//! Internet connectivity tracking. Changes are broadcast to components and skills.

use crate::dispatcher::Dispatcher;
use crate::error::{DialogError, DialogResult};
use crate::event::{Broadcast, EventKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// True when the network is reachable.
    async fn probe(&self) -> bool;
}

/// Expects `204 No Content` from a well-known endpoint.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> DialogResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DialogError::Connectivity(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(res) => res.status() == reqwest::StatusCode::NO_CONTENT,
            Err(e) => {
                debug!(url = %self.url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

pub struct ConnectivityMonitor {
    dispatcher: Arc<Dispatcher>,
    online: AtomicBool,
}

impl ConnectivityMonitor {
    pub const NAME: &'static str = "ConnectivityMonitor";

    pub fn new(dispatcher: Arc<Dispatcher>, online: bool) -> Self {
        Self {
            dispatcher,
            online: AtomicBool::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Store a probe outcome. Broadcasts only when the state flipped; returns whether it did.
    pub fn record(&self, online: bool) -> DialogResult<bool> {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return Ok(false);
        }
        let kind = if online {
            info!("🌐 Internet connected");
            EventKind::InternetConnected
        } else {
            warn!("📴 Internet lost");
            EventKind::InternetLost
        };
        self.dispatcher.broadcast(
            Broadcast::new(kind)
                .excluding(Self::NAME)
                .propagate_to_skills(),
        )?;
        Ok(true)
    }

    /// Probe, then record off the async runtime since dispatch is blocking.
    pub async fn check(self: &Arc<Self>, probe: &dyn ConnectivityProbe) -> DialogResult<bool> {
        let online = probe.probe().await;
        let monitor = Arc::clone(self);
        tokio::task::spawn_blocking(move || monitor.record(online))
            .await
            .map_err(|e| DialogError::Connectivity(e.to_string()))?
    }
}
