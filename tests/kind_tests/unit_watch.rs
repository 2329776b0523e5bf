//! Integration tests for the execution unit watch
//!
//! A real pod labelled as an execution unit is created and the watch pump must
//! deliver its lifecycle to the waiter registered for the resource it deploys.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, DeleteParams};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use composite_controller::crd::{ResourceAction, ResourceIdentity, UnitPhase};
use composite_controller::executor::unit::{environment, unit_name, ExecutionUnit};
use composite_controller::executor::watch::run_unit_watch;
use composite_controller::executor::{CompletionWatcher, KubePodClient, PodClient};

use super::helpers::{ensure_test_cluster, TEST_NAMESPACE};

fn unit(identity: &ResourceIdentity, image: &str) -> ExecutionUnit {
    ExecutionUnit {
        name: unit_name(&identity.name),
        namespace: TEST_NAMESPACE.to_string(),
        identity: identity.clone(),
        image: image.to_string(),
        service_account: "default".to_string(),
        owner: None,
        env: environment(&Default::default(), ResourceAction::Added, identity),
    }
}

/// Story: a deployer pod runs to completion and its waiter is told so
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_waiter_sees_a_real_unit_complete() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let identity = ResourceIdentity::new("EntandoPlugin", TEST_NAMESPACE, "watch-story");
    let pods = KubePodClient::new(client.clone());
    pods.delete_matching(TEST_NAMESPACE, &identity.unit_selector())
        .await
        .expect("failed to clear old units");

    let completion = Arc::new(CompletionWatcher::new());
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let pump = tokio::spawn(run_unit_watch(
        client.clone(),
        TEST_NAMESPACE.to_string(),
        completion.clone(),
        cancel.clone(),
        ready_tx,
    ));
    tokio::time::timeout(Duration::from_secs(30), ready_rx)
        .await
        .expect("watch should finish its initial listing")
        .expect("watch task ended early");

    let mut waiter = completion.register(&identity).expect("register waiter");
    let unit = unit(&identity, "busybox:1.36");
    let mut pod = unit.to_pod();
    if let Some(spec) = pod.spec.as_mut() {
        spec.containers[0].command = Some(vec!["true".to_string()]);
    }
    pods.create(&pod).await.expect("failed to create unit");

    let phase = waiter
        .await_completion(&unit.name, Duration::from_secs(180))
        .await
        .expect("unit should reach a terminal phase");
    assert_eq!(phase, UnitPhase::Succeeded);

    drop(waiter);
    cancel.cancel();
    pump.await.expect("watch task panicked");

    let api: Api<k8s_openapi::api::core::v1::Pod> =
        Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = api.delete(&unit.name, &DeleteParams::default()).await;
}
