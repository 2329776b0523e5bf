//! Shared setup for cluster-backed tests

use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};

use composite_controller::crd::EntandoCompositeApp;

/// Namespace every test works in
pub const TEST_NAMESPACE: &str = "composite-integration-test";

/// Connect to the current cluster, install the CRD and create the test namespace
pub async fn ensure_test_cluster() -> Result<Client, Box<dyn std::error::Error>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = Client::try_default().await?;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        "entandocompositeapps.entando.org",
        &PatchParams::apply("composite-controller-tests").force(),
        &Patch::Apply(&EntandoCompositeApp::crd()),
    )
    .await?;

    let namespaces: Api<Namespace> = Api::all(client.clone());
    if namespaces.get_opt(TEST_NAMESPACE).await?.is_none() {
        let ns: Namespace = serde_json::from_value(serde_json::json!({
            "metadata": { "name": TEST_NAMESPACE }
        }))?;
        namespaces.create(&PostParams::default(), &ns).await?;
    }

    // The CRD is usable once it is established
    for _ in 0..30 {
        let crd = crds.get("entandocompositeapps.entando.org").await?;
        let established = crd
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == "Established" && c.status == "True");
        if established {
            return Ok(client);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Err("EntandoCompositeApp CRD was not established in time".into())
}
