use crate::core::endpoint::DuplexEndpoint;
use crate::core::pump::pause;
use crate::core::reconnect::{ReconnectPolicy, ReconnectState, RetryDecision};
use crate::domain::error::EndpointError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happens to a link when its endpoint fails mid-session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossPolicy {
    /// Close and reopen the same endpoint according to the policy
    Reconnect(ReconnectPolicy),
    /// Drop the endpoint and wait for a driver to install a new one
    AwaitReplacement,
    /// Drop the endpoint and stop the pump that saw the failure
    Terminate,
}

/// What a pump should do after reporting a loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Continue,
    Exit,
    GiveUp,
}

/// One side of a session: a slot holding the current endpoint plus the
/// policy applied when that endpoint fails.
///
/// Drivers (accept and dial loops) mutate the slot with [`Link::install`];
/// pumps only ever read it and report failures through [`Link::on_loss`].
pub struct Link {
    label: String,
    slot: RwLock<Option<Arc<dyn DuplexEndpoint>>>,
    policy: LossPolicy,
    reconnect: Mutex<ReconnectState>,
    recovering: AtomicBool,
}

impl Link {
    pub fn new(label: impl Into<String>, policy: LossPolicy) -> Self {
        let reconnect = match policy {
            LossPolicy::Reconnect(reconnect) => reconnect,
            _ => ReconnectPolicy::serial(),
        };
        Self {
            label: label.into(),
            slot: RwLock::new(None),
            policy,
            reconnect: Mutex::new(ReconnectState::new(reconnect)),
            recovering: AtomicBool::new(false),
        }
    }

    pub fn with_endpoint(
        label: impl Into<String>,
        endpoint: Arc<dyn DuplexEndpoint>,
        policy: LossPolicy,
    ) -> Self {
        let mut link = Self::new(label, policy);
        link.slot = RwLock::new(Some(endpoint));
        link
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn policy(&self) -> LossPolicy {
        self.policy
    }

    pub async fn current(&self) -> Option<Arc<dyn DuplexEndpoint>> {
        self.slot.read().await.clone()
    }

    /// The endpoint if it is open and not being reconnected
    pub async fn live_endpoint(&self) -> Option<Arc<dyn DuplexEndpoint>> {
        if self.recovering.load(Ordering::SeqCst) {
            return None;
        }
        self.current().await.filter(|endpoint| endpoint.is_open())
    }

    pub async fn is_live(&self) -> bool {
        self.live_endpoint().await.is_some()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Consecutive reconnect failures since the last successful open
    pub async fn reconnect_attempts(&self) -> u32 {
        self.reconnect.lock().await.failures()
    }

    /// Put a new endpoint in the slot, closing whatever it replaces
    pub async fn install(&self, endpoint: Arc<dyn DuplexEndpoint>) -> Option<Arc<dyn DuplexEndpoint>> {
        let previous = self.slot.write().await.replace(endpoint);
        if let Some(old) = &previous {
            debug!("{}: replacing {}", self.label, old.identity());
            old.close().await;
        }
        self.reconnect.lock().await.record_success();
        previous
    }

    /// Remove `failed` from the slot if it is still the current endpoint, and close it
    pub async fn release(&self, failed: &Arc<dyn DuplexEndpoint>) {
        {
            let mut slot = self.slot.write().await;
            if slot.as_ref().is_some_and(|current| same_endpoint(current, failed)) {
                slot.take();
            }
        }
        failed.close().await;
    }

    /// Empty the slot and close the endpoint it held
    pub async fn shutdown(&self) {
        let endpoint = self.slot.write().await.take();
        if let Some(endpoint) = endpoint {
            endpoint.close().await;
        }
    }

    /// Apply this link's loss policy to an endpoint that just failed a read or write
    pub async fn on_loss(
        &self,
        failed: &Arc<dyn DuplexEndpoint>,
        error: &EndpointError,
        cancel: &CancellationToken,
    ) -> Recovery {
        match self.policy {
            LossPolicy::AwaitReplacement => {
                info!("{}: lost {} ({}), waiting for a replacement", self.label, failed.identity(), error);
                self.release(failed).await;
                Recovery::Continue
            }
            LossPolicy::Terminate => {
                debug!("{}: lost {} ({})", self.label, failed.identity(), error);
                self.release(failed).await;
                Recovery::Exit
            }
            LossPolicy::Reconnect(_) => {
                // The other direction may already be reconnecting this endpoint
                if self.recovering.swap(true, Ordering::SeqCst) {
                    return Recovery::Continue;
                }
                warn!("{}: {} failed ({}), reconnecting", self.label, failed.identity(), error);
                let outcome = self.reopen(failed, cancel).await;
                self.recovering.store(false, Ordering::SeqCst);
                outcome
            }
        }
    }

    async fn reopen(&self, failed: &Arc<dyn DuplexEndpoint>, cancel: &CancellationToken) -> Recovery {
        failed.close().await;

        loop {
            let decision = self.reconnect.lock().await.record_failure();
            let delay = match decision {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::GiveUp => {
                    warn!("{}: giving up on {}", self.label, failed.identity());
                    self.release(failed).await;
                    return Recovery::GiveUp;
                }
            };

            if !pause(delay, cancel).await {
                return Recovery::Continue;
            }

            match failed.open().await {
                Ok(()) | Err(EndpointError::AlreadyOpen) => {
                    self.reconnect.lock().await.record_success();
                    info!("{}: reconnected {}", self.label, failed.identity());
                    return Recovery::Continue;
                }
                Err(e) => {
                    let attempts = self.reconnect.lock().await.failures();
                    warn!("{}: reconnect attempt {} failed: {}", self.label, attempts, e);
                }
            }
        }
    }
}

fn same_endpoint(a: &Arc<dyn DuplexEndpoint>, b: &Arc<dyn DuplexEndpoint>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
