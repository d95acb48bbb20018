use serbridge::core::pump::PumpTimings;
use serbridge::domain::config::{NetworkConfig, SerialConfig, NULL_DEVICE};
use serbridge::{BridgeConfig, BridgeError, DialBridge, ListenBridge, NullDevice, ReconnectPolicy, SessionState};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Serial bridge tests over the in-memory null device
#[cfg(test)]
mod bridge_tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(3);

    fn fast_timings() -> PumpTimings {
        PumpTimings {
            idle_wait: Duration::from_millis(10),
            empty_backoff: Duration::from_millis(1),
        }
    }

    fn null_config(bind_address: &str, port: u16) -> BridgeConfig {
        BridgeConfig {
            serial: SerialConfig {
                port: NULL_DEVICE.to_string(),
                baud_rate: 115200,
                ..SerialConfig::default()
            },
            network: NetworkConfig {
                listen_port: port,
                bind_address: bind_address.to_string(),
            },
        }
    }

    async fn wait_for_write(device: &NullDevice, expected: &[u8]) {
        timeout(WAIT, async {
            while device.last_write().as_deref() != Some(expected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("serial side never saw the expected write");
    }

    async fn wait_for_client(bridge: &ListenBridge, peer: &TcpStream) {
        let expected = peer.local_addr().unwrap().to_string();
        timeout(WAIT, async {
            while bridge.status().await.client_address.as_deref() != Some(expected.as_str()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bridge never installed the client");
    }

    #[tokio::test]
    async fn test_at_ok_round_trip() {
        let bridge = ListenBridge::new(null_config("127.0.0.1", 0)).with_timings(fast_timings());
        let device = bridge.null_device().expect("null device handle");
        bridge.start().await.unwrap();

        let mut client = TcpStream::connect(bridge.local_addr().unwrap()).await.unwrap();
        client.write_all(b"AT\r\n").await.unwrap();
        wait_for_write(&device, b"AT\r\n").await;

        device.queue_read(b"OK\r\n");
        let mut reply = [0u8; 4];
        timeout(WAIT, client.read_exact(&mut reply)).await.unwrap().unwrap();
        assert_eq!(&reply, b"OK\r\n");

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_new_client_replaces_old_one() {
        let bridge = ListenBridge::new(null_config("127.0.0.1", 0)).with_timings(fast_timings());
        let device = bridge.null_device().unwrap();
        bridge.start().await.unwrap();
        let address = bridge.local_addr().unwrap();

        let mut first = TcpStream::connect(address).await.unwrap();
        wait_for_client(&bridge, &first).await;

        let mut second = TcpStream::connect(address).await.unwrap();
        wait_for_client(&bridge, &second).await;

        // The replaced client sees its socket closed
        let mut buffer = [0u8; 8];
        let n = timeout(WAIT, first.read(&mut buffer)).await.unwrap().unwrap_or(0);
        assert_eq!(n, 0);

        second.write_all(b"ATI\r\n").await.unwrap();
        wait_for_write(&device, b"ATI\r\n").await;

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_client_does_not_block_replacement() {
        let bridge = ListenBridge::new(null_config("127.0.0.1", 0)).with_timings(fast_timings());
        let device = bridge.null_device().unwrap();
        bridge.start().await.unwrap();
        let address = bridge.local_addr().unwrap();

        // Never reads, so its socket buffers fill up
        let stalled = TcpStream::connect(address).await.unwrap();
        wait_for_client(&bridge, &stalled).await;

        let chunk = vec![0xA5u8; 64 * 1024];
        for _ in 0..400 {
            device.queue_read(&chunk);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut second = TcpStream::connect(address).await.unwrap();
        let mut buffer = [0u8; 1024];
        let n = timeout(Duration::from_secs(5), second.read(&mut buffer))
            .await
            .expect("replacement client never received serial data")
            .unwrap();
        assert!(n > 0);
        assert!(buffer[..n].iter().all(|byte| *byte == 0xA5));

        drop(stalled);
        timeout(WAIT, bridge.stop()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serial_data_waits_for_a_client() {
        let bridge = ListenBridge::new(null_config("127.0.0.1", 0)).with_timings(fast_timings());
        let device = bridge.null_device().unwrap();
        bridge.start().await.unwrap();

        device.queue_read(b"RING\r\n");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.pending_reads(), 1);

        let mut client = TcpStream::connect(bridge.local_addr().unwrap()).await.unwrap();
        let mut buffer = [0u8; 6];
        timeout(WAIT, client.read_exact(&mut buffer)).await.unwrap().unwrap();
        assert_eq!(&buffer, b"RING\r\n");

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restartable() {
        let bridge = ListenBridge::new(null_config("127.0.0.1", 0)).with_timings(fast_timings());
        bridge.start().await.unwrap();
        let _client = TcpStream::connect(bridge.local_addr().unwrap()).await.unwrap();

        bridge.stop().await.unwrap();
        let status = bridge.status().await;
        assert_eq!(status.state, SessionState::Closed);
        assert!(!status.serial_open);
        assert!(!status.has_client);

        bridge.stop().await.unwrap();
        assert_eq!(bridge.state(), SessionState::Closed);

        bridge.start().await.unwrap();
        assert_eq!(bridge.state(), SessionState::Active);
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_bridge_forwards_to_remote() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = remote.local_addr().unwrap().port();
        let bridge = DialBridge::new(null_config("127.0.0.1", port)).with_timings(fast_timings());
        let device = bridge.null_device().unwrap();
        bridge.start().await.unwrap();

        let (mut peer, _) = timeout(WAIT, remote.accept()).await.unwrap().unwrap();
        peer.write_all(b"AT\r\n").await.unwrap();
        wait_for_write(&device, b"AT\r\n").await;

        device.queue_read(b"OK\r\n");
        let mut reply = [0u8; 4];
        timeout(WAIT, peer.read_exact(&mut reply)).await.unwrap().unwrap();
        assert_eq!(&reply, b"OK\r\n");

        let status = bridge.status().await;
        assert!(status.network_connected);
        assert_eq!(status.reconnect_attempts, 0);

        bridge.stop().await.unwrap();
        assert_eq!(bridge.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_dial_bridge_gives_up() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let bridge = DialBridge::new(null_config("127.0.0.1", port))
            .with_timings(fast_timings())
            .with_dial_policy(ReconnectPolicy::Bounded {
                delay: Duration::from_millis(10),
                max_attempts: 2,
            })
            .with_connect_timeout(Duration::from_millis(200));
        bridge.start().await.unwrap();

        let outcome = timeout(WAIT, bridge.wait()).await.unwrap();
        assert!(matches!(
            outcome,
            Err(BridgeError::ExhaustedRetries { attempts: 2, .. })
        ));

        let status = bridge.status().await;
        assert!(matches!(status.state, SessionState::Failed(_)));
        assert!(!status.is_running);
        assert!(!status.serial_open);

        // Stopping afterwards keeps the failure visible
        bridge.stop().await.unwrap();
        assert!(matches!(bridge.state(), SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_dial_retry_counter_resets_on_connect() {
        let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = reserved.local_addr().unwrap();
        drop(reserved);

        let bridge = DialBridge::new(null_config("127.0.0.1", address.port()))
            .with_timings(fast_timings())
            .with_dial_policy(ReconnectPolicy::Bounded {
                delay: Duration::from_millis(20),
                max_attempts: 1000,
            })
            .with_connect_timeout(Duration::from_millis(200));
        bridge.start().await.unwrap();

        timeout(WAIT, async {
            while bridge.status().await.reconnect_attempts == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let remote = TcpListener::bind(address).await.unwrap();
        let (_peer, _) = timeout(WAIT, remote.accept()).await.unwrap().unwrap();

        timeout(WAIT, async {
            loop {
                let status = bridge.status().await;
                if status.network_connected && status.reconnect_attempts == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_serial_device_fails_start() {
        let mut config = null_config("127.0.0.1", 0);
        config.serial.port = "/dev/serbridge-does-not-exist".to_string();
        let bridge = ListenBridge::new(config);

        assert!(matches!(bridge.start().await, Err(BridgeError::OpenFailure { .. })));
        assert_eq!(bridge.state(), SessionState::Closed);
        assert!(bridge.local_addr().is_none());
    }
}
