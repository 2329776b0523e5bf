//! Execution units: the deployer pods that run a delegated controller

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::crd::{ResourceAction, ResourceIdentity};

/// Name of the single container in every execution unit
pub const DEPLOYER_CONTAINER: &str = "deployer";

const SUFFIX_LEN: usize = 4;

/// `<name>-deployer-<4 random lowercase alphanumerics>`
pub fn unit_name(resource_name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{resource_name}-deployer-{suffix}")
}

/// Environment handed to the delegated controller.
///
/// The passthrough variables come first; the resource coordinates are written
/// last so they always win over a passthrough variable of the same name.
pub fn environment(
    passthrough: &BTreeMap<String, String>,
    action: ResourceAction,
    identity: &ResourceIdentity,
) -> Vec<EnvVar> {
    let mut vars = passthrough.clone();
    vars.insert(crate::ENV_RESOURCE_ACTION.to_string(), action.as_str().to_string());
    vars.insert(crate::ENV_RESOURCE_NAMESPACE.to_string(), identity.namespace.clone());
    vars.insert(crate::ENV_RESOURCE_NAME.to_string(), identity.name.clone());

    vars.into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            value_from: None,
        })
        .collect()
}

/// Everything needed to build one execution unit
#[derive(Clone, Debug)]
pub struct ExecutionUnit {
    /// Pod name
    pub name: String,
    /// Namespace the pod runs in
    pub namespace: String,
    /// Resource the unit deploys
    pub identity: ResourceIdentity,
    /// Controller image
    pub image: String,
    /// Service account the pod runs as
    pub service_account: String,
    /// Owner reference to the resource being deployed
    pub owner: Option<OwnerReference>,
    /// Container environment
    pub env: Vec<EnvVar>,
}

impl ExecutionUnit {
    /// Render as a pod manifest
    pub fn to_pod(&self) -> Pod {
        // Owners must live in the dependent's namespace, otherwise the garbage
        // collector treats the owner as absent and removes the pod
        let owner_references = self
            .owner
            .clone()
            .filter(|_| self.identity.namespace == self.namespace)
            .map(|o| vec![o]);

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.identity.unit_labels()),
                owner_references,
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                service_account_name: Some(self.service_account.clone()),
                containers: vec![Container {
                    name: DEPLOYER_CONTAINER.to_string(),
                    image: Some(self.image.clone()),
                    image_pull_policy: Some("IfNotPresent".to_string()),
                    env: Some(self.env.clone()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        }
    }
}
