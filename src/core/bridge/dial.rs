use crate::core::bridge::serial_link;
use crate::core::endpoint::DuplexEndpoint;
use crate::core::link::{Link, LossPolicy};
use crate::core::pump::{pause, PumpTimings};
use crate::core::reconnect::{ReconnectPolicy, ReconnectState, RetryDecision};
use crate::core::session::{BridgeSession, Lifecycle, Run, SessionState, StateReporter};
use crate::core::status::ClientStatus;
use crate::domain::config::BridgeConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::{NullDevice, SerialEndpoint};
use crate::infrastructure::tcp::TcpEndpoint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Span};

/// Connect timeout for each outward dial
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial port pushed to a remote listener.
///
/// The bridge keeps dialing `network.bind_address:network.listen_port`.
/// A lost connection is redialed with a fresh failure count; running out of
/// retries moves the bridge to `Failed` and closes the serial port.
pub struct DialBridge {
    config: BridgeConfig,
    serial: Arc<SerialEndpoint>,
    serial_link: Arc<Link>,
    remote_link: Arc<Link>,
    lifecycle: Lifecycle,
    dial_policy: ReconnectPolicy,
    connect_timeout: Duration,
    dial_failures: Arc<AtomicU32>,
    timings: PumpTimings,
    span: Span,
}

impl DialBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let serial = Arc::new(SerialEndpoint::new(config.serial.clone()));
        let span = info_span!("dial", serial = %config.serial.port, remote = %config.network.address());
        Self {
            serial_link: serial_link(&serial, ReconnectPolicy::serial()),
            remote_link: Arc::new(Link::new("remote", LossPolicy::Terminate)),
            serial,
            config,
            lifecycle: Lifecycle::new(),
            dial_policy: ReconnectPolicy::dial(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dial_failures: Arc::new(AtomicU32::new(0)),
            timings: PumpTimings::default(),
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_timings(mut self, timings: PumpTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_dial_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.dial_policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_serial_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.serial_link = serial_link(&self.serial, policy);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn remote_address(&self) -> String {
        self.config.network.address()
    }

    pub fn null_device(&self) -> Option<NullDevice> {
        self.serial.null_device()
    }

    /// Open the serial port and start dialing
    pub async fn start(&self) -> BridgeResult<()> {
        self.lifecycle.start(|reporter| self.open(reporter)).await?;
        info!(
            "Dialing {} for {}",
            self.remote_address(),
            self.config.serial.port
        );
        Ok(())
    }

    pub async fn stop(&self) -> BridgeResult<()> {
        self.lifecycle
            .stop(|| async {
                self.remote_link.shutdown().await;
                self.serial.close().await;
                info!("Dial bridge on {} stopped", self.config.serial.port);
            })
            .await
    }

    /// Wait until the bridge stops running.
    ///
    /// Fails with [`BridgeError::ExhaustedRetries`] when the bridge gave up
    /// dialing, which callers treat as fatal.
    pub async fn wait(&self) -> BridgeResult<()> {
        match self.lifecycle.settled().await {
            SessionState::Failed(_) => Err(BridgeError::ExhaustedRetries {
                target: self.remote_address(),
                attempts: self.dial_policy.max_attempts().unwrap_or(0),
            }),
            _ => Ok(()),
        }
    }

    pub async fn status(&self) -> ClientStatus {
        let state = self.lifecycle.state();
        ClientStatus {
            is_running: state.is_running(),
            state,
            serial_port: self.config.serial.port.clone(),
            serial_open: self.serial.is_open(),
            remote_address: self.remote_address(),
            network_connected: self.remote_link.is_live().await,
            reconnect_attempts: self.dial_failures.load(Ordering::SeqCst),
        }
    }

    async fn open(&self, reporter: StateReporter) -> BridgeResult<Run> {
        self.serial
            .open()
            .await
            .map_err(|source| BridgeError::OpenFailure {
                endpoint: self.config.serial.port.clone(),
                source,
            })?;

        self.dial_failures.store(0, Ordering::SeqCst);
        let run = Run::new();
        let dialer = Dialer {
            address: self.remote_address(),
            serial: Arc::clone(&self.serial),
            serial_link: Arc::clone(&self.serial_link),
            remote_link: Arc::clone(&self.remote_link),
            policy: self.dial_policy,
            connect_timeout: self.connect_timeout,
            failures: Arc::clone(&self.dial_failures),
            timings: self.timings,
            span: self.span.clone(),
            reporter,
            cancel: run.cancel_token(),
        };
        run.spawn(dialer.run(), &self.span);
        Ok(run)
    }
}

/// State owned by the dial loop task
struct Dialer {
    address: String,
    serial: Arc<SerialEndpoint>,
    serial_link: Arc<Link>,
    remote_link: Arc<Link>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    failures: Arc<AtomicU32>,
    timings: PumpTimings,
    span: Span,
    reporter: StateReporter,
    cancel: CancellationToken,
}

impl Dialer {
    async fn run(self) {
        let mut reconnect = ReconnectState::new(self.policy);

        while !self.cancel.is_cancelled() {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                connected = TcpEndpoint::connect(self.address.clone(), self.connect_timeout) => connected,
            };

            match connected {
                Ok(endpoint) => {
                    reconnect.record_success();
                    self.failures.store(0, Ordering::SeqCst);
                    info!("Connected to {}", self.address);
                    self.remote_link.install(endpoint).await;
                    self.forward_until_lost().await;
                }
                Err(e) => match reconnect.record_failure() {
                    RetryDecision::RetryAfter(delay) => {
                        self.failures.store(reconnect.failures(), Ordering::SeqCst);
                        warn!(
                            "Connection to {} failed (attempt {}): {}",
                            self.address,
                            reconnect.failures(),
                            e
                        );
                        if !pause(delay, &self.cancel).await {
                            break;
                        }
                    }
                    RetryDecision::GiveUp => {
                        error!(
                            "Giving up on {} after {} retries: {}",
                            self.address,
                            reconnect.failures(),
                            e
                        );
                        self.reporter.fail(format!(
                            "gave up connecting to {} after {} retries",
                            self.address,
                            reconnect.failures()
                        ));
                        self.serial.close().await;
                        self.cancel.cancel();
                        break;
                    }
                },
            }
        }
    }

    /// Pump until the connection is lost or the bridge stops
    async fn forward_until_lost(&self) {
        let mut session = BridgeSession::spawn(
            Arc::clone(&self.serial_link),
            Arc::clone(&self.remote_link),
            self.cancel.child_token(),
            self.timings,
            &self.span,
        );

        let exit = tokio::select! {
            _ = self.cancel.cancelled() => None,
            exit = session.wait_any() => exit,
        };
        session.drain().await;
        self.remote_link.shutdown().await;

        if !self.cancel.is_cancelled() {
            info!("Connection to {} lost ({:?}), redialing", self.address, exit);
        }
    }
}
