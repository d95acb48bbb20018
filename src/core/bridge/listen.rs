use crate::core::bridge::serial_link;
use crate::core::endpoint::DuplexEndpoint;
use crate::core::link::{Link, LossPolicy};
use crate::core::pump::{pause, PumpTimings};
use crate::core::reconnect::ReconnectPolicy;
use crate::core::session::{BridgeSession, Lifecycle, Run, SessionState};
use crate::core::status::BridgeStatus;
use crate::domain::config::BridgeConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::{NullDevice, SerialEndpoint};
use crate::infrastructure::tcp::TcpEndpoint;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Span};

/// Serial port exposed to one TCP client at a time.
///
/// A newly accepted client replaces the current one, whose socket is closed.
/// Between clients the serial side keeps running and its data is held back
/// until a client arrives.
pub struct ListenBridge {
    config: BridgeConfig,
    serial: Arc<SerialEndpoint>,
    serial_link: Arc<Link>,
    client_link: Arc<Link>,
    lifecycle: Lifecycle,
    local_addr: Mutex<Option<SocketAddr>>,
    timings: PumpTimings,
    span: Span,
}

impl ListenBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let serial = Arc::new(SerialEndpoint::new(config.serial.clone()));
        let span = info_span!("listen", serial = %config.serial.port);
        Self {
            serial_link: serial_link(&serial, ReconnectPolicy::serial()),
            client_link: Arc::new(Link::new("network", LossPolicy::AwaitReplacement)),
            serial,
            config,
            lifecycle: Lifecycle::new(),
            local_addr: Mutex::new(None),
            timings: PumpTimings::default(),
            span,
        }
    }

    /// Span every task of this bridge is instrumented with
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_timings(mut self, timings: PumpTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Policy used to reopen the serial port after a read or write failure
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

    /// Handle to the in-memory device when the port is `/dev/null`
    pub fn null_device(&self) -> Option<NullDevice> {
        self.serial.null_device()
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    /// Open the serial port, bind the listener and start forwarding
    pub async fn start(&self) -> BridgeResult<()> {
        self.lifecycle.start(|_| self.open()).await?;
        info!(
            "Bridge active: {} <-> {}",
            self.config.serial.port,
            self.local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| self.config.network.address())
        );
        Ok(())
    }

    /// Stop forwarding, disconnect the client and close the serial port
    pub async fn stop(&self) -> BridgeResult<()> {
        self.lifecycle
            .stop(|| async {
                self.client_link.shutdown().await;
                self.serial.close().await;
                if let Ok(mut addr) = self.local_addr.lock() {
                    *addr = None;
                }
                info!("Bridge on {} stopped", self.config.serial.port);
            })
            .await
    }

    pub async fn status(&self) -> BridgeStatus {
        let state = self.lifecycle.state();
        let client = self.client_link.live_endpoint().await;
        let local_addr = self.local_addr();
        BridgeStatus {
            is_running: state.is_running(),
            state,
            serial_port: self.config.serial.port.clone(),
            serial_open: self.serial.is_open(),
            listen_address: local_addr
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| self.config.network.address()),
            network_listening: local_addr.is_some(),
            has_client: client.is_some(),
            client_address: client.map(|client| client.identity()),
            reconnect_attempts: self.serial_link.reconnect_attempts().await,
        }
    }

    async fn open(&self) -> BridgeResult<Run> {
        self.serial
            .open()
            .await
            .map_err(|source| BridgeError::OpenFailure {
                endpoint: self.config.serial.port.clone(),
                source,
            })?;

        let address = self.config.network.address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                self.serial.close().await;
                return Err(BridgeError::BindFailure { address, source });
            }
        };
        let bound = listener.local_addr().ok();
        if let Ok(mut addr) = self.local_addr.lock() {
            *addr = bound;
        }

        let run = Run::new();
        let cancel = run.cancel_token();
        run.spawn(
            accept_loop(listener, Arc::clone(&self.client_link), cancel.clone(), self.timings),
            &self.span,
        );

        let session = BridgeSession::spawn(
            Arc::clone(&self.serial_link),
            Arc::clone(&self.client_link),
            cancel.child_token(),
            self.timings,
            &self.span,
        );
        run.spawn(
            async move {
                cancel.cancelled().await;
                session.drain().await;
            },
            &self.span,
        );

        Ok(run)
    }
}

/// Accepts clients until cancelled; each new client takes over the network link
async fn accept_loop(
    listener: TcpListener,
    client_link: Arc<Link>,
    cancel: CancellationToken,
    timings: PumpTimings,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                info!("Client connected from {}", addr);
                let endpoint: Arc<dyn DuplexEndpoint> = Arc::new(TcpEndpoint::from_stream(stream));
                if let Some(previous) = client_link.install(endpoint).await {
                    info!("Client {} replaced by {}", previous.identity(), addr);
                }
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                if !pause(timings.idle_wait, &cancel).await {
                    break;
                }
            }
        }
    }
    debug!("accept loop stopped");
}
