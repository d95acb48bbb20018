use crate::core::link::Link;
use crate::core::pump::{ForwardingPump, PumpExit, PumpStats, PumpTimings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument, Span};

/// Two pumps, one per direction, over a pair of links.
///
/// Both pumps share one cancellation token. The session never touches the
/// endpoints itself; closing them is up to whichever driver owns the links.
pub struct BridgeSession {
    local: Arc<Link>,
    remote: Arc<Link>,
    cancel: CancellationToken,
    pumps: JoinSet<PumpExit>,
    active: Arc<AtomicUsize>,
    outbound: Arc<PumpStats>,
    inbound: Arc<PumpStats>,
    started_at: SystemTime,
}

/// Decrements the active-pump counter when a pump task ends, however it ends
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BridgeSession {
    /// Spawn `local -> remote` and `remote -> local` pumps
    pub fn spawn(
        local: Arc<Link>,
        remote: Arc<Link>,
        cancel: CancellationToken,
        timings: PumpTimings,
        span: &Span,
    ) -> Self {
        let active = Arc::new(AtomicUsize::new(0));
        let mut pumps = JoinSet::new();

        let outbound_pump = ForwardingPump::new(Arc::clone(&local), Arc::clone(&remote), cancel.clone())
            .with_timings(timings);
        let inbound_pump = ForwardingPump::new(Arc::clone(&remote), Arc::clone(&local), cancel.clone())
            .with_timings(timings);
        let outbound = outbound_pump.stats();
        let inbound = inbound_pump.stats();

        for pump in [outbound_pump, inbound_pump] {
            active.fetch_add(1, Ordering::SeqCst);
            let guard = ActiveGuard(Arc::clone(&active));
            pumps.spawn(
                async move {
                    let _guard = guard;
                    pump.run().await
                }
                .instrument(span.clone()),
            );
        }

        Self {
            local,
            remote,
            cancel,
            pumps,
            active,
            outbound,
            inbound,
            started_at: SystemTime::now(),
        }
    }

    pub fn local(&self) -> &Arc<Link> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<Link> {
        &self.remote
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pump tasks that have not exited yet (0, 1 or 2)
    pub fn active_pumps(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Bytes forwarded local -> remote
    pub fn bytes_out(&self) -> u64 {
        self.outbound.bytes()
    }

    /// Bytes forwarded remote -> local
    pub fn bytes_in(&self) -> u64 {
        self.inbound.bytes()
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Wait until the first pump exits and report why.
    /// Returns `None` once both pumps have already been collected.
    pub async fn wait_any(&mut self) -> Option<PumpExit> {
        loop {
            match self.pumps.join_next().await? {
                Ok(exit) => return Some(exit),
                Err(e) => warn!("pump task ended abnormally: {}", e),
            }
        }
    }

    /// Cancel both pumps and wait for them to exit
    pub async fn drain(mut self) -> Vec<PumpExit> {
        self.cancel.cancel();
        let mut exits = Vec::with_capacity(2);
        while let Some(result) = self.pumps.join_next().await {
            match result {
                Ok(exit) => exits.push(exit),
                Err(e) => warn!("pump task ended abnormally: {}", e),
            }
        }
        exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::endpoint::testing::ScriptedEndpoint;
    use crate::core::endpoint::DuplexEndpoint;
    use crate::core::link::LossPolicy;
    use crate::core::reconnect::ReconnectPolicy;
    use crate::domain::error::EndpointError;
    use std::time::Duration;

    fn link(name: &str, policy: LossPolicy) -> (Arc<ScriptedEndpoint>, Arc<Link>) {
        let endpoint = Arc::new(ScriptedEndpoint::new(name));
        let dynamic: Arc<dyn DuplexEndpoint> = endpoint.clone();
        (endpoint, Arc::new(Link::with_endpoint(name, dynamic, policy)))
    }

    fn fast() -> PumpTimings {
        PumpTimings {
            idle_wait: Duration::from_millis(5),
            empty_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_session_forwards_both_directions() {
        let (serial, serial_link) = link("serial", LossPolicy::Terminate);
        let (network, network_link) = link("network", LossPolicy::Terminate);

        serial.push_read(b"OK\r\n");
        network.push_read(b"AT\r\n");

        let session = BridgeSession::spawn(
            serial_link,
            network_link,
            CancellationToken::new(),
            fast(),
            &Span::none(),
        );
        assert_eq!(session.active_pumps(), 2);

        tokio::time::timeout(Duration::from_secs(2), async {
            while serial.written() != b"AT\r\n" || network.written() != b"OK\r\n" {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("both directions should forward");

        assert_eq!(session.bytes_out(), 4);
        assert_eq!(session.bytes_in(), 4);

        let exits = session.drain().await;
        assert_eq!(exits, vec![PumpExit::Cancelled, PumpExit::Cancelled]);
    }

    #[tokio::test]
    async fn test_wait_any_reports_first_exit() {
        let (client, client_link) = link("client", LossPolicy::Terminate);
        let (_target, target_link) = link("target", LossPolicy::Terminate);

        client.push_error(EndpointError::Closed);

        let mut session = BridgeSession::spawn(
            client_link,
            target_link,
            CancellationToken::new(),
            fast(),
            &Span::none(),
        );

        let first = tokio::time::timeout(Duration::from_secs(2), session.wait_any())
            .await
            .unwrap();
        assert_eq!(first, Some(PumpExit::LinkLost { link: "client".to_string() }));

        session.drain().await;
    }

    #[tokio::test]
    async fn test_serial_read_error_reconnects_once_while_network_waits() {
        let reconnect = ReconnectPolicy::Unbounded {
            delay: Duration::from_millis(100),
        };
        let (serial, serial_link) = link("serial", LossPolicy::Reconnect(reconnect));
        let (network, network_link) = link("network", LossPolicy::AwaitReplacement);
        serial.push_error(EndpointError::Closed);

        let session = BridgeSession::spawn(
            serial_link.clone(),
            network_link,
            CancellationToken::new(),
            fast(),
            &Span::none(),
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while !serial_link.is_recovering() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("serial read error should start a reconnect");

        // Queued while the serial side is down; held until the reopen
        network.push_read(b"ATZ\r\n");
        assert!(!serial_link.is_live().await);
        assert!(serial.written().is_empty());

        tokio::time::timeout(Duration::from_secs(2), async {
            while serial.written() != b"ATZ\r\n" {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("pending network data should reach the reopened serial side");
        assert_eq!(serial.open_count(), 1);
        assert!(!serial_link.is_recovering());

        serial.push_read(b"OK\r\n");
        tokio::time::timeout(Duration::from_secs(2), async {
            while network.written() != b"OK\r\n" {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("serial data should flow again after the reopen");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(serial.open_count(), 1);
        assert_eq!(serial_link.reconnect_attempts().await, 0);

        session.drain().await;
    }

    #[tokio::test]
    async fn test_drain_leaves_no_active_pumps() {
        let (_a, a_link) = link("a", LossPolicy::AwaitReplacement);
        let (_b, b_link) = link("b", LossPolicy::AwaitReplacement);
        let cancel = CancellationToken::new();

        let session = BridgeSession::spawn(a_link, b_link, cancel.clone(), fast(), &Span::none());
        let active = Arc::clone(&session.active);
        session.drain().await;

        assert!(cancel.is_cancelled());
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
