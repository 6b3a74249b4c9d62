//! 服务 Watcher 集成测试（内存后端）

mod common;

use common::{GROUP, backend_instance, default_client, memory_client, sorted_endpoints};
use flare_nacos_bridge::{
    BridgeConfig, BridgeError, Discovery, MemoryBackend, Operation, RegistryOptions,
    ServiceInstance, ServiceWatcher, Watcher, WatcherState, watch_stream,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tokio_test::{assert_pending, assert_ready};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn watcher_subscribes_every_qualified_name() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();

    assert_eq!(watcher.state(), WatcherState::Active);
    assert_eq!(watcher.subscription_count(), 2);
    assert_eq!(backend.calls(Operation::Subscribe), vec!["svc.http", "svc.grpc"]);
    assert_eq!(backend.subscriber_count(), 2);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn pushes_for_two_names_merge_into_one_view() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();

    backend.push(GROUP, "svc.grpc", vec![backend_instance("10.0.0.1", 9090, "grpc", "svc.grpc")]);
    let first = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(sorted_endpoints(&first), vec!["grpc://10.0.0.1:9090"]);

    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);
    let second = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(second.len(), 2);
    assert!(second.iter().all(|inst| inst.name == "svc"));
    // 扇出顺序：http 在前
    assert_eq!(second[0].endpoints, vec!["http://10.0.0.1:8080"]);
    assert_eq!(second[1].endpoints, vec!["grpc://10.0.0.1:9090"]);

    // 后写覆盖
    backend.push(GROUP, "svc.grpc", Vec::new());
    let third = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(sorted_endpoints(&third), vec!["http://10.0.0.1:8080"]);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn existing_instances_are_delivered_on_subscribe() {
    let (client, backend) = default_client();
    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);

    let watcher = client.watch_service("svc").await.unwrap();
    let snapshot = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(sorted_endpoints(&snapshot), vec!["http://10.0.0.1:8080"]);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn saturated_channel_drops_without_blocking() {
    let (client, backend) = memory_client(BridgeConfig::new().with_watcher_buffer(1));
    let watcher = client.watch_service("svc").await.unwrap();

    // 缓冲区为 1：第一次推送入队，第二次被丢弃，但合并存储已记录
    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);
    backend.push(GROUP, "svc.grpc", vec![backend_instance("10.0.0.1", 9090, "grpc", "svc.grpc")]);

    let queued = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(sorted_endpoints(&queued), vec!["http://10.0.0.1:8080"]);

    // 下一次送达的快照是完整合并结果
    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.2", 8080, "http", "svc.http")]);
    let next = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(
        sorted_endpoints(&next),
        vec!["grpc://10.0.0.1:9090", "http://10.0.0.2:8080"]
    );

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn next_waits_until_a_push_arrives() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();

    let mut next = tokio_test::task::spawn(watcher.next());
    assert_pending!(next.poll());

    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);
    assert!(next.is_woken());
    let snapshot = assert_ready!(next.poll()).unwrap();
    assert_eq!(snapshot.len(), 1);
    drop(next);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn stop_wakes_blocked_next() {
    let (client, _backend) = default_client();
    let watcher = Arc::new(client.watch_service("svc").await.unwrap());

    let blocked = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.next().await })
    };
    tokio::task::yield_now().await;

    watcher.stop().await.unwrap();

    let result = timeout(WAIT, blocked).await.unwrap().unwrap();
    assert!(matches!(result, Err(BridgeError::Cancelled)));
    assert!(matches!(watcher.next().await, Err(BridgeError::Cancelled)));
    assert_eq!(watcher.state(), WatcherState::Stopped);
}

#[tokio::test]
async fn stop_returns_while_a_polled_next_is_kept_alive() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();

    // next() 已拿到接收端锁后挂起，且不再被轮询
    let mut parked = tokio_test::task::spawn(watcher.next());
    assert_pending!(parked.poll());

    timeout(WAIT, watcher.stop()).await.unwrap().unwrap();
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(backend.subscriber_count(), 0);

    assert!(matches!(assert_ready!(parked.poll()), Err(BridgeError::Cancelled)));
    drop(parked);
    assert!(matches!(watcher.next().await, Err(BridgeError::Cancelled)));
}

#[tokio::test]
async fn stop_returns_while_stream_has_an_inflight_next() {
    let (client, backend) = default_client();
    let watcher = Arc::new(client.watch_service("svc").await.unwrap());
    let mut stream = Box::pin(watch_stream(watcher.clone()));

    tokio::select! {
        item = stream.next() => panic!("no push yet, got {:?}", item.map(|r| r.is_ok())),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }

    timeout(WAIT, watcher.stop()).await.unwrap().unwrap();
    assert_eq!(backend.subscriber_count(), 0);
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn owner_token_cancels_next_but_keeps_subscriptions() {
    let backend = Arc::new(MemoryBackend::new());
    let token = CancellationToken::new();
    let watcher = Arc::new(
        ServiceWatcher::start_with_token(
            backend.clone(),
            "svc",
            &RegistryOptions::default(),
            token.clone(),
        )
        .await
        .unwrap(),
    );
    assert_eq!(backend.subscriber_count(), 2);

    let blocked = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.next().await })
    };
    tokio::task::yield_now().await;

    token.cancel();
    let result = timeout(WAIT, blocked).await.unwrap().unwrap();
    assert!(matches!(result, Err(BridgeError::Cancelled)));

    // 取消只影响 next()，订阅仍由 Watcher 持有
    assert_eq!(watcher.subscription_count(), 2);
    assert_eq!(backend.subscriber_count(), 2);
    assert_eq!(backend.call_count(Operation::Unsubscribe), 0);

    watcher.stop().await.unwrap();
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(backend.subscriber_count(), 0);
}

#[tokio::test]
async fn stop_is_terminal_and_idempotent() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();

    watcher.stop().await.unwrap();
    assert_eq!(backend.subscriber_count(), 0);
    assert_eq!(backend.call_count(Operation::Unsubscribe), 2);

    watcher.stop().await.unwrap();
    assert_eq!(backend.call_count(Operation::Unsubscribe), 2);

    // 停止后的推送被忽略
    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);
    assert!(matches!(watcher.next().await, Err(BridgeError::Cancelled)));
}

#[tokio::test]
async fn failed_unsubscribe_is_reported_as_partial_failure() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();
    backend.inject_fault(Operation::Unsubscribe, "svc.http");

    let err = watcher.stop().await.unwrap_err();
    match err {
        BridgeError::PartialFailure { failed, attempted, .. } => {
            assert_eq!(failed, 1);
            assert_eq!(attempted, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    // 其余订阅仍被取消，Watcher 进入终态
    assert_eq!(backend.calls(Operation::Unsubscribe), vec!["svc.http", "svc.grpc"]);
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(matches!(watcher.next().await, Err(BridgeError::Cancelled)));
}

#[tokio::test]
async fn partial_subscribe_failure_still_activates() {
    let (client, backend) = default_client();
    backend.inject_fault(Operation::Subscribe, "svc.http");

    let watcher = client.watch_service("svc").await.unwrap();
    assert_eq!(watcher.state(), WatcherState::Active);
    assert_eq!(watcher.subscription_count(), 1);

    backend.push(GROUP, "svc.grpc", vec![backend_instance("10.0.0.1", 9090, "grpc", "svc.grpc")]);
    let snapshot = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(sorted_endpoints(&snapshot), vec!["grpc://10.0.0.1:9090"]);

    watcher.stop().await.unwrap();
    assert_eq!(backend.calls(Operation::Unsubscribe), vec!["svc.grpc"]);
}

#[tokio::test]
async fn all_subscriptions_failing_leaves_an_idle_watcher() {
    let (client, backend) = default_client();
    backend.inject_fault_all(Operation::Subscribe);

    let watcher = client.watch_service("svc").await.unwrap();
    assert_eq!(watcher.state(), WatcherState::Active);
    assert_eq!(watcher.subscription_count(), 0);
    assert!(timeout(Duration::from_millis(50), watcher.next()).await.is_err());

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn callback_errors_do_not_touch_the_view() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();

    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);
    timeout(WAIT, watcher.next()).await.unwrap().unwrap();

    backend.push_error(GROUP, "svc.http", "connection reset");
    backend.push(GROUP, "svc.grpc", vec![backend_instance("10.0.0.1", 9090, "grpc", "svc.grpc")]);
    let snapshot = timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 2);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn dropping_a_watcher_releases_subscriptions() {
    let (client, backend) = default_client();
    let watcher = client.watch_service("svc").await.unwrap();
    assert_eq!(backend.subscriber_count(), 2);
    drop(watcher);

    for _ in 0..50 {
        if backend.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(backend.subscriber_count(), 0);
}

#[tokio::test]
async fn trait_object_watcher_streams_until_stopped() {
    let (client, backend) = default_client();
    let watcher: Arc<dyn Watcher<Item = Vec<ServiceInstance>>> = Arc::from(client.watch("svc").await.unwrap());

    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);

    let mut stream = Box::pin(watch_stream(watcher.clone()));
    let snapshot = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(snapshot.len(), 1);

    watcher.stop().await.unwrap();
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn watch_rejects_empty_service_name() {
    let (client, backend) = default_client();
    let err = client.watch("").await.err().unwrap();
    assert!(matches!(err, BridgeError::InvalidInput(_)));
    assert_eq!(backend.call_count(Operation::Subscribe), 0);
}
