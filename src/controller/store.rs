//! Resource store access for components and the composite status

use async_trait::async_trait;
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::api::{DynamicObject, Patch, PatchParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;

use crate::crd::{ComponentKind, CompositeStatus, EntandoCompositeApp};
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting the resource store so the orchestrator can be tested
/// without a cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComponentStore: Send + Sync {
    /// Load a component resource; a missing resource is `Error::NotFound`
    async fn load(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, Error>;

    /// Create the resource or bring the existing one in line with `object`.
    /// Repeating the call with the same object changes nothing.
    async fn create_or_patch(
        &self,
        kind: ComponentKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Remove one annotation from a resource, if present
    async fn remove_annotation(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<(), Error>;

    /// Replace the status of a composite. Fields absent from `status` are
    /// removed from the stored one.
    async fn patch_composite_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CompositeStatus,
    ) -> Result<(), Error>;
}

/// JSON patch that swaps the whole `/status` member for `status`.
///
/// `add` on an existing member replaces it, so a cleared message or a unit
/// from an earlier run does not survive the write the way it would under a
/// merge patch.
pub fn status_patch(status: &CompositeStatus) -> Result<json_patch::Patch, Error> {
    Ok(json_patch::Patch(vec![PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["status"]),
        value: serde_json::to_value(status)?,
    })]))
}

/// [`ComponentStore`] over the Kubernetes API
pub struct KubeComponentStore {
    client: Client,
}

impl KubeComponentStore {
    /// Create a store
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ComponentKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

#[async_trait]
impl ComponentStore for KubeComponentStore {
    async fn load(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, Error> {
        self.api(kind, namespace)
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("{kind} {namespace}/{name}")))
    }

    async fn create_or_patch(
        &self,
        kind: ComponentKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation(format!("{kind} component has no name")))?;
        let namespace = object
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation(format!("{kind} {name} has no namespace")))?;

        let applied = self
            .api(kind, namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            )
            .await?;
        Ok(applied)
    }

    async fn remove_annotation(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": { "annotations": { key: null } }
        });
        self.api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_composite_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CompositeStatus,
    ) -> Result<(), Error> {
        let api: Api<EntandoCompositeApp> = Api::namespaced(self.client.clone(), namespace);
        let patch = status_patch(status)?;
        api.patch_status(name, &PatchParams::default(), &Patch::<()>::Json(patch))
            .await?;
        Ok(())
    }
}
