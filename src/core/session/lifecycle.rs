use crate::core::session::state::SessionState;
use crate::domain::error::{BridgeError, BridgeResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, Instrument, Span};

/// The tasks belonging to one Start..Stop span of a driver
pub struct Run {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Run {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    pub fn spawn<F>(&self, task: F, span: &Span)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task.instrument(span.clone()));
    }

    /// Cancel every task and wait for all of them to exit
    pub async fn finish(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Default for Run {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets a background task report that the driver has failed for good
#[derive(Clone)]
pub struct StateReporter {
    state: Arc<watch::Sender<SessionState>>,
}

impl StateReporter {
    /// Move to `Failed` unless a Stop is already under way.
    /// Returns whether the transition happened.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.state.send_if_modified(|state| {
            if state.is_running() {
                *state = SessionState::Failed(reason);
                true
            } else {
                false
            }
        })
    }
}

/// State machine shared by every driver.
///
/// Start and Stop hold one lock for their whole duration, so they never
/// interleave. Readers observe the state through a watch channel and never
/// touch that lock.
pub struct Lifecycle {
    state: Arc<watch::Sender<SessionState>>,
    run: Mutex<Option<Run>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            state: Arc::new(state),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn reporter(&self) -> StateReporter {
        StateReporter {
            state: Arc::clone(&self.state),
        }
    }

    /// Run `opening` and move to `Active` if it succeeds.
    ///
    /// Fails with [`BridgeError::AlreadyRunning`] from `Opening`, `Active`
    /// or `Draining`. A failed `opening` leaves the driver `Closed`.
    pub async fn start<F, Fut>(&self, opening: F) -> BridgeResult<()>
    where
        F: FnOnce(StateReporter) -> Fut,
        Fut: Future<Output = BridgeResult<Run>>,
    {
        let mut slot = self.run.lock().await;
        if !self.state().can_start() {
            return Err(BridgeError::AlreadyRunning);
        }
        // Tasks left behind by a run that failed on its own
        if let Some(stale) = slot.take() {
            stale.finish().await;
        }

        self.state.send_replace(SessionState::Opening);
        match opening(self.reporter()).await {
            Ok(run) => {
                *slot = Some(run);
                // A task may already have reported failure
                self.state.send_if_modified(|state| {
                    if *state == SessionState::Opening {
                        *state = SessionState::Active;
                        true
                    } else {
                        false
                    }
                });
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(SessionState::Closed);
                Err(e)
            }
        }
    }

    /// Cancel the running tasks, wait for them, then run `release`.
    ///
    /// A second Stop, or a Stop before any Start, does nothing. A driver
    /// that already failed keeps its `Failed` state.
    pub async fn stop<F, Fut>(&self, release: F) -> BridgeResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut slot = self.run.lock().await;
        let run = match slot.take() {
            Some(run) => run,
            None => return Ok(()),
        };

        let failed = self.state().failure().is_some();
        if !failed {
            self.state.send_replace(SessionState::Draining);
        }
        run.finish().await;
        release().await;
        if !failed {
            self.state.send_replace(SessionState::Closed);
        }
        debug!("stopped in state {}", self.state());
        Ok(())
    }

    /// Wait until the driver is neither opening nor active
    pub async fn settled(&self) -> SessionState {
        let mut receiver = self.subscribe();
        let settled = match receiver.wait_for(|state| !state.is_running()).await {
            Ok(state) => (*state).clone(),
            Err(_) => self.state(),
        };
        settled
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
