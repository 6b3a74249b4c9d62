//! 配置源集成测试（内存后端）

mod common;

use common::{GROUP, default_client, memory_client};
use flare_nacos_bridge::{
    BridgeConfig, BridgeError, ConfigSource, Operation, Watcher, WatcherState,
};
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tokio_test::{assert_pending, assert_ready};

const WAIT: Duration = Duration::from_secs(2);

fn gateway_config() -> BridgeConfig {
    BridgeConfig::new().with_config_data_id("gateway.yaml")
}

#[tokio::test]
async fn load_returns_document_as_key_value() {
    let (client, backend) = memory_client(gateway_config());
    backend.publish_config("gateway.yaml", GROUP, "port: 8080\n");

    let kvs = client.config_source().load().await.unwrap();
    assert_eq!(kvs.len(), 1);
    assert_eq!(kvs[0].key, "gateway.yaml");
    assert_eq!(kvs[0].value_str(), Some("port: 8080\n"));
    assert_eq!(kvs[0].format, "yaml");
}

#[tokio::test]
async fn load_of_missing_document_is_empty() {
    let (client, _backend) = memory_client(gateway_config());
    let kvs = client.config_source().load().await.unwrap();
    assert_eq!(kvs.len(), 1);
    assert!(kvs[0].value.is_empty());
}

#[tokio::test]
async fn load_uses_configured_group() {
    let (client, backend) = memory_client(gateway_config().with_config_group("IM"));
    backend.publish_config("gateway.yaml", GROUP, "wrong");
    backend.publish_config("gateway.yaml", "IM", "right");

    let kvs = client.config_source().load().await.unwrap();
    assert_eq!(kvs[0].value_str(), Some("right"));
}

#[tokio::test]
async fn load_failure_is_upstream_unavailable() {
    let (client, backend) = memory_client(gateway_config());
    backend.inject_fault_all(Operation::GetConfig);

    let err = client.config_source().load().await.unwrap_err();
    assert!(matches!(err, BridgeError::UpstreamUnavailable { .. }));
}

#[tokio::test]
async fn empty_data_id_is_rejected() {
    let (client, backend) = default_client();
    let source = client.config_source();

    assert!(matches!(source.load().await, Err(BridgeError::InvalidInput(_))));
    assert!(matches!(source.watch().await, Err(BridgeError::InvalidInput(_))));
    assert_eq!(backend.call_count(Operation::GetConfig), 0);
    assert_eq!(backend.call_count(Operation::ListenConfig), 0);
}

#[tokio::test]
async fn watcher_delivers_latest_document() {
    let (client, backend) = memory_client(gateway_config());
    let watcher = client.config_source().watch().await.unwrap();
    assert_eq!(watcher.state(), WatcherState::Active);
    assert_eq!(backend.listener_count(), 1);

    backend.publish_config("gateway.yaml", GROUP, "port: 9090\n");
    let kvs = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(kvs.len(), 1);
    assert_eq!(kvs[0].key, "gateway.yaml");
    assert_eq!(kvs[0].value_str(), Some("port: 9090\n"));

    watcher.stop().await.unwrap();
    assert_eq!(backend.listener_count(), 0);
}

#[tokio::test]
async fn watcher_ignores_other_documents() {
    let (client, backend) = memory_client(gateway_config());
    let watcher = client.config_source().watch().await.unwrap();

    backend.publish_config("other.yaml", GROUP, "x: 1");
    assert!(timeout(Duration::from_millis(50), watcher.next()).await.is_err());

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn full_channel_drops_newer_changes() {
    let (client, backend) = memory_client(gateway_config());
    let watcher = client.config_source().watch().await.unwrap();

    // 默认缓冲区为 1
    backend.publish_config("gateway.yaml", GROUP, "v: 1");
    backend.publish_config("gateway.yaml", GROUP, "v: 2");

    let kvs = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(kvs[0].value_str(), Some("v: 1"));
    assert!(timeout(Duration::from_millis(50), watcher.next()).await.is_err());

    backend.publish_config("gateway.yaml", GROUP, "v: 3");
    let kvs = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(kvs[0].value_str(), Some("v: 3"));

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn listen_failure_fails_watch() {
    let (client, backend) = memory_client(gateway_config());
    backend.inject_fault_all(Operation::ListenConfig);

    let err = client.config_source().watch().await.err().unwrap();
    assert!(matches!(err, BridgeError::UpstreamUnavailable { .. }));
    assert_eq!(backend.listener_count(), 0);
}

#[tokio::test]
async fn stop_wakes_blocked_next_and_is_terminal() {
    let (client, backend) = memory_client(gateway_config());
    let watcher = Arc::new(client.config_source().watch().await.unwrap());

    let blocked = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.next().await })
    };
    tokio::task::yield_now().await;

    watcher.stop().await.unwrap();
    let result = timeout(WAIT, blocked).await.unwrap().unwrap();
    assert!(matches!(result, Err(BridgeError::Cancelled)));
    assert!(matches!(watcher.next().await, Err(BridgeError::Cancelled)));

    watcher.stop().await.unwrap();
    assert_eq!(backend.call_count(Operation::CancelListenConfig), 1);
}

#[tokio::test]
async fn stop_returns_while_a_polled_next_is_kept_alive() {
    let (client, backend) = memory_client(gateway_config());
    let watcher = client.config_source().watch().await.unwrap();

    let mut parked = tokio_test::task::spawn(watcher.next());
    assert_pending!(parked.poll());

    timeout(WAIT, watcher.stop()).await.unwrap().unwrap();
    assert_eq!(backend.listener_count(), 0);

    // 停止后的变更不再送达
    backend.publish_config("gateway.yaml", GROUP, "port: 9090\n");
    assert!(matches!(assert_ready!(parked.poll()), Err(BridgeError::Cancelled)));
    drop(parked);
    assert!(matches!(watcher.next().await, Err(BridgeError::Cancelled)));
}

#[tokio::test]
async fn unlisten_failure_is_upstream_unavailable() {
    let (client, backend) = memory_client(gateway_config());
    let watcher = client.config_source().watch().await.unwrap();
    backend.inject_fault_all(Operation::CancelListenConfig);

    let err = watcher.stop().await.unwrap_err();
    assert!(matches!(err, BridgeError::UpstreamUnavailable { .. }));
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(matches!(watcher.next().await, Err(BridgeError::Cancelled)));
}

#[tokio::test]
async fn custom_format_is_passed_through() {
    let mut config = gateway_config();
    config.config.format = "json".to_string();
    let (client, backend) = memory_client(config);
    backend.publish_config("gateway.yaml", GROUP, "{}");

    let kvs = client.config_source().load().await.unwrap();
    assert_eq!(kvs[0].format, "json");
}
