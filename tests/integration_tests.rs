//! auxcache Integration Tests
//!
//! End-to-end behaviour across the public API:
//! - Disk tier: write-behind with purgatory cancellation
//! - Remote propagation: dispatcher → listener → local caches
//! - Discovery: broadcaster and receiver over loopback UDP

use std::sync::Arc;
use std::time::Duration;

use auxcache::cache::{CacheElement, CacheHub, CacheStatus};
use auxcache::config::DiskCacheConfig;
use auxcache::disk::{DiskBackend, InMemoryDiskBackend};

fn disk_hub() -> (Arc<InMemoryDiskBackend>, Arc<CacheHub>) {
    let backend = Arc::new(InMemoryDiskBackend::new());
    let shared = backend.clone();
    let hub = CacheHub::with_disk(
        DiskCacheConfig::default(),
        Arc::new(move |_: &str| shared.clone() as Arc<dyn DiskBackend>),
    );
    (backend, Arc::new(hub))
}

async fn drain(hub: &CacheHub, cache_name: &str) {
    let disk = hub.disk_cache(cache_name).unwrap();
    for _ in 0..500 {
        if disk.event_queue().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("disk queue for {cache_name} did not drain");
}

// =============================================================================
// Disk Tier
// =============================================================================

mod disk_tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_update_reaches_backend_through_composite() {
        let (backend, hub) = disk_hub();
        let cache = hub.get_cache("users").unwrap();

        assert_ok!(cache.update(CacheElement::new("users", "A", "v1")).await);
        drain(&hub, "users").await;

        assert_eq!(backend.peek("A").unwrap().value().as_ref(), b"v1");
        assert_eq!(hub.disk_cache("users").unwrap().stats().purgatory_size, 0);
    }

    #[tokio::test]
    async fn test_disk_tier_serves_after_drain() {
        let (_, hub) = disk_hub();
        let cache = hub.get_cache("users").unwrap();
        cache.update(CacheElement::new("users", "A", "v1")).await.unwrap();
        drain(&hub, "users").await;

        // Served by the backend now that purgatory is empty
        let disk = hub.disk_cache("users").unwrap();
        assert_eq!(disk.stats().purgatory_size, 0);
        assert_eq!(disk.get("A").await.unwrap().value().as_ref(), b"v1");
        assert_eq!(disk.stats().purgatory_hits, 0);
    }

    #[tokio::test]
    async fn test_remove_then_get_misses() {
        let (backend, hub) = disk_hub();
        let disk = {
            hub.get_cache("users").unwrap();
            hub.disk_cache("users").unwrap()
        };

        disk.update(Arc::new(CacheElement::new("users", "A", "v1")));
        assert!(disk.remove("A").await);
        drain(&hub, "users").await;

        assert!(disk.get("A").await.is_none());
        assert!(backend.peek("A").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_disposes_disk_tiers() {
        let (_, hub) = disk_hub();
        hub.get_cache("users").unwrap();
        hub.get_cache("orders").unwrap();

        hub.shutdown().await;

        for name in ["users", "orders"] {
            let disk = hub.disk_cache(name).unwrap();
            assert_eq!(disk.status(), CacheStatus::Disposed);
            assert!(!disk.event_queue().is_alive());
        }
    }
}

// =============================================================================
// Remote Propagation
// =============================================================================

mod remote_tests {
    use super::*;
    use auxcache::cache::{ElementSerializer, PayloadEncoding, StandardSerializer};
    use auxcache::config::RemoteListenerConfig;
    use auxcache::remote::{
        HubCacheService, RemoteCacheListener, RemoteCacheRequest, RemoteCacheResponse,
        RemoteUpdateListener, RequestDispatcher,
    };

    fn node(listener_id: u64) -> (Arc<InMemoryDiskBackend>, Arc<CacheHub>, RequestDispatcher) {
        let (backend, hub) = disk_hub();
        let listener = Arc::new(RemoteUpdateListener::new(
            RemoteListenerConfig::default(),
            hub.clone(),
        ));
        listener.set_listener_id(listener_id);
        let dispatcher = RequestDispatcher::new(Arc::new(HubCacheService::new(hub.clone(), listener)));
        (backend, hub, dispatcher)
    }

    async fn send(dispatcher: &RequestDispatcher, request: RemoteCacheRequest) -> RemoteCacheResponse {
        // Through the wire format, as the HTTP endpoint does
        let body = serde_json::to_vec(&request).unwrap();
        dispatcher.process_json(&body).await
    }

    #[tokio::test]
    async fn test_peer_update_lands_on_local_disk() {
        let (backend, hub, dispatcher) = node(42);

        let response = send(
            &dispatcher,
            RemoteCacheRequest::update(CacheElement::new("users", "A", "v1")).with_requester(7),
        )
        .await;
        assert!(response.success);

        drain(&hub, "users").await;
        assert_eq!(backend.peek("A").unwrap().value().as_ref(), b"v1");

        let got = send(&dispatcher, RemoteCacheRequest::get("users", "A")).await;
        assert_eq!(got.payload["A"].value().as_ref(), b"v1");
    }

    #[tokio::test]
    async fn test_compacted_update_is_decoded() {
        let (_, hub, dispatcher) = node(42);
        let element = CacheElement::new("users", "blob", vec![9u8; 4096]);
        let compacted = StandardSerializer::new()
            .serialize(&element, PayloadEncoding::Lz4)
            .unwrap();

        let response = send(&dispatcher, RemoteCacheRequest::update(compacted).with_requester(7)).await;
        assert!(response.success);

        let cache = hub.existing("users").unwrap();
        assert_eq!(*cache.get("blob").await.unwrap(), element);
    }

    #[tokio::test]
    async fn test_echo_of_own_update_not_applied() {
        let (_, hub, dispatcher) = node(42);

        let response = send(
            &dispatcher,
            RemoteCacheRequest::update(CacheElement::new("users", "A", "echo")).with_requester(42),
        )
        .await;

        assert!(response.success);
        assert!(hub.existing("users").is_none());
    }

    #[tokio::test]
    async fn test_peer_remove_all_clears_memory_and_disk() {
        let (backend, hub, dispatcher) = node(42);
        let cache = hub.get_cache("users").unwrap();
        cache.update(CacheElement::new("users", "A", "v")).await.unwrap();
        cache.update(CacheElement::new("users", "B", "v")).await.unwrap();
        drain(&hub, "users").await;

        let response = send(&dispatcher, RemoteCacheRequest::remove_all("users").with_requester(7)).await;
        assert!(response.success);

        assert_eq!(cache.size(), 0);
        assert!(backend.peek("A").is_none());
        assert!(backend.peek("B").is_none());
    }
}

// =============================================================================
// Discovery
// =============================================================================

mod discovery_tests {
    use super::*;
    use auxcache::cache::HostedCaches;
    use auxcache::config::DiscoveryConfig;
    use auxcache::discovery::{
        BroadcastKind, DiscoveryBroadcaster, DiscoveryMessage, DiscoveryReceiver, PeerRegistry,
        UdpChannelFactory,
    };
    use tokio::net::UdpSocket;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_startup_request_and_passive_over_loopback() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        let hosted = HostedCaches::new();
        hosted.insert("users");
        let config = DiscoveryConfig {
            discovery_address: "127.0.0.1".into(),
            discovery_port: port,
            service_host: "127.0.0.1".into(),
            service_port: 1110,
            ..Default::default()
        };
        let broadcaster = DiscoveryBroadcaster::start(
            config,
            Uuid::new_v4(),
            hosted,
            Arc::new(UdpChannelFactory::new("127.0.0.1", port)),
        )
        .await;
        broadcaster.tick().await;

        let mut buf = vec![0u8; 4096];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let first = DiscoveryMessage::decode(&buf[..len]).unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let second = DiscoveryMessage::decode(&buf[..len]).unwrap();

        assert_eq!(first.kind, BroadcastKind::Request);
        assert_eq!(second.kind, BroadcastKind::Passive);
        assert_eq!(second.cache_names, vec!["users"]);
        assert_eq!(second.sender_id, broadcaster.sender_id());
    }

    #[tokio::test]
    async fn test_receiver_records_peer_from_socket() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        // Our own broadcasts go nowhere useful in this test
        let broadcaster = Arc::new(DiscoveryBroadcaster::new(
            DiscoveryConfig::default(),
            Uuid::new_v4(),
            HostedCaches::new(),
            Arc::new(UdpChannelFactory::new("127.0.0.1", 9)),
        ));
        let peers = Arc::new(PeerRegistry::new());
        let receiver = Arc::new(DiscoveryReceiver::new(peers.clone(), broadcaster));
        let shutdown = CancellationToken::new();

        let handle = {
            let receiver = receiver.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { receiver.run(socket, shutdown).await })
        };

        let peer = DiscoveryMessage::passive(Uuid::new_v4(), "10.1.1.1", 1110, vec!["orders".into()]);
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&peer.encode().unwrap(), ("127.0.0.1", port))
            .await
            .unwrap();

        for _ in 0..200 {
            if !peers.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        let found = peers.peers_for("orders");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].endpoint(), "10.1.1.1:1110");
    }
}
