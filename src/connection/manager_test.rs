use std::sync::Arc;
use std::time::Duration;

use crate::test_utils::enable_logger;
use crate::test_utils::settle;
use crate::test_utils::MemoryTransport;
use crate::test_utils::MemoryTransportFactory;
use crate::ConnectionConfig;
use crate::ConnectionError;
use crate::ConnectionManager;
use crate::ConnectionState;
use crate::Error;
use crate::LifecycleEvent;
use crate::MockTransportFactory;
use crate::Transport;

fn manager_with(factory: Arc<MemoryTransportFactory>) -> ConnectionManager {
    ConnectionManager::new(factory, ConnectionConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_acquires_share_one_connect_attempt() {
    enable_logger();
    let factory = Arc::new(MemoryTransportFactory::with(|_| {
        MemoryTransport::new().with_start_delay(Duration::from_millis(200))
    }));
    let manager = manager_with(factory.clone());

    let (a, b, c) = tokio::join!(manager.acquire(), manager.acquire(), manager.acquire());

    let a = a.unwrap();
    assert!(Arc::ptr_eq(&a, &b.unwrap()));
    assert!(Arc::ptr_eq(&a, &c.unwrap()));
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.last().unwrap().starts(), 1);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_acquire_reuses_connected_transport() {
    let factory = Arc::new(MemoryTransportFactory::new());
    let manager = manager_with(factory.clone());

    let first = manager.acquire().await.unwrap();
    let second = manager.acquire().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_reaches_every_waiter_and_resets() {
    let factory = Arc::new(MemoryTransportFactory::with(|n| {
        if n == 0 {
            MemoryTransport::new()
                .with_start_delay(Duration::from_millis(10))
                .failing_start("hub unavailable")
        } else {
            MemoryTransport::new()
        }
    }));
    let manager = manager_with(factory.clone());

    let (a, b) = tokio::join!(manager.acquire(), manager.acquire());
    for result in [a, b] {
        match result {
            Err(Error::Connection(ConnectionError::StartFailed(reason))) => {
                assert!(reason.contains("hub unavailable"))
            }
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }
    assert_eq!(factory.created(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // No retry loop in the manager; the next acquire starts over
    manager.acquire().await.unwrap();
    assert_eq!(factory.created(), 2);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_is_reported_as_start_failure() {
    let factory = Arc::new(MemoryTransportFactory::with(|_| {
        MemoryTransport::new().with_start_delay(Duration::from_secs(60))
    }));
    let config = ConnectionConfig {
        connect_timeout_ms: 100,
        ..Default::default()
    };
    let manager = ConnectionManager::new(factory.clone(), config);

    let Err(err) = manager.acquire().await else {
        panic!("acquire should time out");
    };
    assert!(matches!(err, Error::Connection(ConnectionError::StartFailed(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(factory.last().unwrap().stops(), 1);
}

#[tokio::test]
async fn test_disconnected_transport_is_replaced() {
    let factory = Arc::new(MemoryTransportFactory::new());
    let manager = manager_with(factory.clone());

    let first = manager.acquire().await.unwrap();
    factory.last().unwrap().set_state(ConnectionState::Disconnected);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let second = manager.acquire().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_state_follows_transport_reconnects() {
    let factory = Arc::new(MemoryTransportFactory::new());
    let manager = manager_with(factory.clone());
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    manager.acquire().await.unwrap();
    let transport = factory.last().unwrap();

    transport.set_state(ConnectionState::Connecting);
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(!manager.is_connected());

    transport.set_state(ConnectionState::Connected);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_lifecycle_events_are_republished() {
    let factory = Arc::new(MemoryTransportFactory::new());
    let manager = manager_with(factory.clone());
    let mut events = manager.lifecycle();

    manager.acquire().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Connected);

    let transport = factory.last().unwrap();
    transport.emit(LifecycleEvent::Reconnecting);
    transport.emit(LifecycleEvent::Reconnected);
    assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Reconnecting);
    assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Reconnected);
}

#[tokio::test]
async fn test_reconnect_does_not_touch_attachments() {
    let factory = Arc::new(MemoryTransportFactory::new());
    let manager = manager_with(factory.clone());

    let transport = manager.acquire().await.unwrap();
    let _rx = transport.attach("wishlist-trending-1h");
    let memory = factory.last().unwrap();

    memory.emit(LifecycleEvent::Reconnected);
    settle().await;

    assert_eq!(memory.attaches(), 1);
    assert_eq!(memory.detaches(), 0);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_transport_and_resets() {
    let factory = Arc::new(MemoryTransportFactory::new());
    let manager = manager_with(factory.clone());
    let mut events = manager.lifecycle();

    manager.acquire().await.unwrap();
    manager.shutdown().await;

    assert_eq!(factory.last().unwrap().stops(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Connected);
    assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Closed(None));
}

#[tokio::test]
async fn test_factory_called_once_per_attempt() {
    let mut factory = MockTransportFactory::new();
    factory
        .expect_create()
        .times(1)
        .returning(|| Arc::new(MemoryTransport::new()) as Arc<dyn Transport>);
    let manager = ConnectionManager::new(Arc::new(factory), ConnectionConfig::default());

    manager.acquire().await.unwrap();
    manager.acquire().await.unwrap();
}
