use crate::core::endpoint::DuplexEndpoint;
use crate::core::link::{Link, LossPolicy};
use crate::core::pump::{pause, PumpTimings};
use crate::core::relay::registry::{ConnectionRegistry, Reservation};
use crate::core::session::{BridgeSession, Lifecycle, Run, SessionState};
use crate::core::status::ServerStatus;
use crate::domain::config::RelayConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::tcp::{TcpEndpoint, RELAY_READ_TIMEOUT};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Forwards every accepted client to one fixed upstream target.
///
/// Each client gets its own target connection and pump pair. A client that
/// arrives while the registry is full is closed without dialing the target.
pub struct RelayServer {
    config: RelayConfig,
    registry: ConnectionRegistry,
    lifecycle: Lifecycle,
    local_addr: Mutex<Option<SocketAddr>>,
    read_timeout: Duration,
    timings: PumpTimings,
    span: Span,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let span = info_span!("relay", listen = %config.server, target = %config.target);
        Self {
            registry: ConnectionRegistry::new(config.clients.max_connections),
            config,
            lifecycle: Lifecycle::new(),
            local_addr: Mutex::new(None),
            read_timeout: RELAY_READ_TIMEOUT,
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

    /// Read deadline applied to both legs of every relayed pair
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    /// Bind the server address and start accepting clients
    pub async fn start(&self) -> BridgeResult<()> {
        self.lifecycle.start(|_| self.open()).await?;
        info!(
            "Relay listening on {}, forwarding to {} (max {} connections)",
            self.local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| self.config.server.address()),
            self.config.target,
            self.registry.max_connections()
        );
        Ok(())
    }

    /// Stop accepting, tear down every relayed pair and wait for them
    pub async fn stop(&self) -> BridgeResult<()> {
        self.lifecycle
            .stop(|| async {
                if let Ok(mut addr) = self.local_addr.lock() {
                    *addr = None;
                }
                info!("Relay stopped");
            })
            .await
    }

    /// Run one liveness sweep now; returns how many entries were cancelled
    pub async fn sweep(&self) -> usize {
        self.registry.sweep().await
    }

    pub fn status(&self) -> ServerStatus {
        let state = self.lifecycle.state();
        ServerStatus {
            is_running: state.is_running(),
            state,
            listen_address: self
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| self.config.server.address()),
            active_connections: self.registry.len(),
            max_connections: self.registry.max_connections(),
            target_host: self.config.target.host.clone(),
            target_port: self.config.target.port,
            connections: self.registry.connections(),
        }
    }

    async fn open(&self) -> BridgeResult<Run> {
        let address = self.config.server.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| BridgeError::BindFailure { address, source })?;
        let bound = listener.local_addr().ok();
        if let Ok(mut addr) = self.local_addr.lock() {
            *addr = bound;
        }

        let run = Run::new();
        let relay = Relay {
            registry: self.registry.clone(),
            target: self.config.target.address(),
            connect_timeout: self.config.clients.connection_timeout,
            read_timeout: self.read_timeout,
            timings: self.timings,
            cancel: run.cancel_token(),
            tracker: run.tracker(),
            span: self.span.clone(),
        };
        run.spawn(relay.accept_loop(listener), &self.span);
        run.spawn(
            sweep_loop(self.registry.clone(), self.config.clients.sweep_interval, run.cancel_token()),
            &self.span,
        );
        Ok(run)
    }
}

/// Everything a relayed pair needs, shared by the accept loop and its children
#[derive(Clone)]
struct Relay {
    registry: ConnectionRegistry,
    target: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    timings: PumpTimings,
    cancel: CancellationToken,
    tracker: TaskTracker,
    span: Span,
}

impl Relay {
    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => match self.registry.try_reserve() {
                    Ok(reservation) => {
                        debug!("Client connected from {}", addr);
                        let relay = self.clone();
                        self.tracker.spawn(
                            relay
                                .serve(stream, addr, reservation)
                                .instrument(self.span.clone()),
                        );
                    }
                    Err(e) => {
                        warn!("Rejecting client {}: {}", addr, e);
                        drop(stream);
                    }
                },
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    if !pause(self.timings.idle_wait, &self.cancel).await {
                        break;
                    }
                }
            }
        }
        debug!("relay accept loop stopped");
    }

    /// Dial the target for one client and pump until either leg fails
    async fn serve(self, stream: TcpStream, addr: SocketAddr, reservation: Reservation) {
        let client = Arc::new(TcpEndpoint::from_stream(stream).with_read_timeout(self.read_timeout));
        let target = Arc::new(
            TcpEndpoint::dialer(self.target.clone(), self.connect_timeout).with_read_timeout(self.read_timeout),
        );

        let dialed = tokio::select! {
            _ = self.cancel.cancelled() => {
                client.close().await;
                return;
            }
            dialed = target.open() => dialed,
        };
        if let Err(e) = dialed {
            warn!("Dropping client {}: target {} unreachable: {}", addr, self.target, e);
            client.close().await;
            return;
        }

        let entry_cancel = self.cancel.child_token();
        let entry = reservation.commit(Arc::clone(&client), Arc::clone(&target), entry_cancel.clone());
        info!("Relaying {} <-> {} as {}", addr, self.target, entry.id);

        let client_endpoint: Arc<dyn DuplexEndpoint> = client.clone();
        let target_endpoint: Arc<dyn DuplexEndpoint> = target.clone();
        let mut session = BridgeSession::spawn(
            Arc::new(Link::with_endpoint("client", client_endpoint, LossPolicy::Terminate)),
            Arc::new(Link::with_endpoint("target", target_endpoint, LossPolicy::Terminate)),
            entry_cancel.clone(),
            self.timings,
            &self.span,
        );

        let exit = tokio::select! {
            _ = entry_cancel.cancelled() => None,
            exit = session.wait_any() => exit,
        };
        let (sent, received) = (session.bytes_out(), session.bytes_in());
        session.drain().await;
        client.close().await;
        target.close().await;
        self.registry.remove(entry.id);

        info!(
            "Connection {} from {} closed after {} bytes out, {} bytes in ({:?})",
            entry.id, addr, sent, received, exit
        );
    }
}

async fn sweep_loop(registry: ConnectionRegistry, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let swept = registry.sweep().await;
                if swept > 0 {
                    debug!("sweep cancelled {} dead connections", swept);
                }
            }
        }
    }
}
