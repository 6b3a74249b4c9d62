//! 服务发现集成测试（内存后端）

mod common;

use common::{GROUP, backend_instance, default_client, memory_client, sorted_endpoints};
use flare_nacos_bridge::{BridgeConfig, BridgeError, Discovery, Operation, Protocol};

#[tokio::test]
async fn get_service_merges_every_protocol() {
    let (client, backend) = default_client();
    backend.push(GROUP, "svc.http", vec![backend_instance("10.0.0.1", 8080, "http", "svc.http")]);
    backend.push(GROUP, "svc.grpc", vec![backend_instance("10.0.0.1", 9090, "grpc", "svc.grpc")]);

    let instances = client.get_service("svc").await.unwrap();

    assert_eq!(backend.calls(Operation::Select), vec!["svc.http", "svc.grpc"]);
    assert_eq!(instances.len(), 2);
    assert!(instances.iter().all(|inst| inst.name == "svc" && inst.version == "v1"));
    assert_eq!(
        sorted_endpoints(&instances),
        vec!["grpc://10.0.0.1:9090", "http://10.0.0.1:8080"]
    );
}

#[tokio::test]
async fn unhealthy_and_disabled_instances_are_filtered() {
    let (client, backend) = default_client();
    let mut unhealthy = backend_instance("10.0.0.2", 8080, "http", "svc.http");
    unhealthy.healthy = false;
    let mut disabled = backend_instance("10.0.0.3", 8080, "http", "svc.http");
    disabled.enabled = false;
    backend.push(
        GROUP,
        "svc.http",
        vec![backend_instance("10.0.0.1", 8080, "http", "svc.http"), unhealthy, disabled],
    );

    let instances = client.get_service("svc").await.unwrap();
    assert_eq!(sorted_endpoints(&instances), vec!["http://10.0.0.1:8080"]);
}

#[tokio::test]
async fn partial_query_failure_returns_remaining_instances() {
    let (client, backend) = default_client();
    backend.push(GROUP, "svc.grpc", vec![backend_instance("10.0.0.1", 9090, "grpc", "svc.grpc")]);
    backend.inject_fault(Operation::Select, "svc.http");

    let instances = client.get_service("svc").await.unwrap();
    assert_eq!(sorted_endpoints(&instances), vec!["grpc://10.0.0.1:9090"]);
}

#[tokio::test]
async fn all_queries_failing_is_upstream_unavailable() {
    let (client, backend) = default_client();
    backend.inject_fault_all(Operation::Select);

    let err = client.get_service("svc").await.unwrap_err();
    assert!(matches!(err, BridgeError::UpstreamUnavailable { .. }));
    assert_eq!(backend.call_count(Operation::Select), 2);
}

#[tokio::test]
async fn empty_result_without_errors_is_ok() {
    let (client, _backend) = default_client();
    let instances = client.get_service("missing").await.unwrap();
    assert!(instances.is_empty());
}

#[tokio::test]
async fn empty_service_name_is_rejected() {
    let (client, backend) = default_client();
    let err = client.get_service("").await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidInput(_)));
    assert_eq!(backend.call_count(Operation::Select), 0);
}

#[tokio::test]
async fn missing_protocol_metadata_falls_back_to_suffix_and_default() {
    let (client, backend) = memory_client(BridgeConfig::new().with_default_protocol(Protocol::Grpc));
    let mut bare = backend_instance("10.0.0.1", 8080, "http", "svc.http");
    bare.metadata.clear();
    backend.push(GROUP, "svc.http", vec![bare]);

    let instances = client.get_service("svc").await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].endpoints, vec!["http://10.0.0.1:8080"]);
    assert_eq!(instances[0].version, "");
}

#[tokio::test]
async fn configured_clusters_limit_results() {
    let (client, backend) = memory_client(BridgeConfig::new().with_registry_clusters(["bj"]));
    let mut in_bj = backend_instance("10.0.0.1", 8080, "http", "svc.http");
    in_bj.cluster_name = "bj".to_string();
    let elsewhere = backend_instance("10.0.0.2", 8080, "http", "svc.http");
    backend.push(GROUP, "svc.http", vec![in_bj, elsewhere]);

    let instances = client.get_service("svc").await.unwrap();
    assert_eq!(sorted_endpoints(&instances), vec!["http://10.0.0.1:8080"]);
}
