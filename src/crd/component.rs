//! Components of a composite: wire entries, the Inline/Reference sum type and
//! the typed specs inline components decode into

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kind::{ComponentKind, REFERENCE_KIND};
use super::types::DbmsVendor;
use super::EntandoCompositeAppSpec;
use crate::Error;

/// Schema for free-form objects the API server must store verbatim
pub(crate) fn preserve_unknown_fields(
    _: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        Value::Bool(true),
    );
    schema.into()
}

/// One entry of `spec.components` as stored in the composite
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ComponentEntry {
    /// Kind of the component, or `EntandoCustomResourceReference`
    pub kind: String,

    /// Metadata of the component resource
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub metadata: ObjectMeta,

    /// Kind-specific spec
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub spec: Value,
}

impl ComponentEntry {
    /// Convert the wire entry into its variant
    pub fn to_component(&self) -> Result<Component, Error> {
        if self.kind == REFERENCE_KIND {
            let spec: ReferenceSpec = serde_json::from_value(self.spec.clone()).map_err(|e| {
                Error::validation(format!(
                    "reference {} has an invalid spec: {e}",
                    self.metadata.name.as_deref().unwrap_or("<unnamed>")
                ))
            })?;
            return Ok(Component::Reference(ReferenceComponent {
                name: self.metadata.name.clone(),
                target_kind: spec.target_kind,
                target_namespace: spec.target_namespace,
                target_name: spec.target_name,
            }));
        }

        Ok(Component::Inline(InlineComponent {
            kind: self.kind.clone(),
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
        }))
    }
}

/// Spec of an `EntandoCustomResourceReference` entry
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSpec {
    /// Kind of the referenced resource
    pub target_kind: String,
    /// Namespace of the referenced resource (defaults to the composite's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
    /// Name of the referenced resource
    pub target_name: String,
}

/// A component of a composite: either defined inline or referenced
#[derive(Clone, Debug, PartialEq)]
pub enum Component {
    /// Defined in the composite; the composite owns it
    Inline(InlineComponent),
    /// Points at a resource that exists independently
    Reference(ReferenceComponent),
}

/// Inline component before it has been decoded against the kind registry
#[derive(Clone, Debug, PartialEq)]
pub struct InlineComponent {
    /// Kind string as written in the composite
    pub kind: String,
    /// Metadata as written in the composite
    pub metadata: ObjectMeta,
    /// Raw spec
    pub spec: Value,
}

impl InlineComponent {
    /// Decode the raw spec into the typed spec for `kind`
    pub fn decode(&self, kind: ComponentKind) -> Result<TypedComponent, Error> {
        Ok(TypedComponent {
            kind,
            metadata: self.metadata.clone(),
            spec: ComponentSpec::decode(kind, self.spec.clone())?,
        })
    }
}

/// Reference to an existing resource; never mutated beyond annotation cleanup
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceComponent {
    /// Name of the reference entry itself
    pub name: Option<String>,
    /// Kind of the target
    pub target_kind: String,
    /// Namespace of the target, if given
    pub target_namespace: Option<String>,
    /// Name of the target
    pub target_name: String,
}

/// An inline component whose spec has been decoded
#[derive(Clone, Debug, PartialEq)]
pub struct TypedComponent {
    /// Registry kind
    pub kind: ComponentKind,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Typed spec
    pub spec: ComponentSpec,
}

impl TypedComponent {
    /// Ingress-capable view of the spec, if the kind has one
    pub fn as_ingressing_mut(&mut self) -> Option<&mut dyn IngressingDeployment> {
        self.spec.as_ingressing_mut()
    }

    /// Render as a dynamic object ready to be applied
    pub fn to_dynamic(&self) -> Result<DynamicObject, Error> {
        let mut metadata = self.metadata.clone();
        // Server-side apply rejects these on input
        metadata.resource_version = None;
        metadata.managed_fields = None;

        let mut obj = DynamicObject::new("", &self.kind.api_resource());
        obj.metadata = metadata;
        obj.data = serde_json::json!({ "spec": self.spec.to_value()? });
        Ok(obj)
    }
}

/// Capability of deployments that expose an ingress and may use a database.
///
/// Composite-level overrides only ever touch specs implementing this trait.
pub trait IngressingDeployment {
    /// Database vendor, if set
    fn dbms(&self) -> Option<DbmsVendor>;
    /// Set the database vendor
    fn set_dbms(&mut self, dbms: DbmsVendor);
    /// Ingress hostname, if set
    fn ingress_host_name(&self) -> Option<&str>;
    /// Set the ingress hostname
    fn set_ingress_host_name(&mut self, host: String);
    /// TLS secret name, if set
    fn tls_secret_name(&self) -> Option<&str>;
    /// Set the TLS secret name
    fn set_tls_secret_name(&mut self, secret: String);
}

macro_rules! impl_ingressing_deployment {
    ($($spec:ty),+ $(,)?) => {
        $(
            impl IngressingDeployment for $spec {
                fn dbms(&self) -> Option<DbmsVendor> {
                    self.dbms
                }
                fn set_dbms(&mut self, dbms: DbmsVendor) {
                    self.dbms = Some(dbms);
                }
                fn ingress_host_name(&self) -> Option<&str> {
                    self.ingress_host_name.as_deref()
                }
                fn set_ingress_host_name(&mut self, host: String) {
                    self.ingress_host_name = Some(host);
                }
                fn tls_secret_name(&self) -> Option<&str> {
                    self.tls_secret_name.as_deref()
                }
                fn set_tls_secret_name(&mut self, secret: String) {
                    self.tls_secret_name = Some(secret);
                }
            }
        )+
    };
}

impl_ingressing_deployment!(KeycloakServerSpec, PluginSpec, AppSpec);

/// Typed spec of an inline component
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentSpec {
    /// EntandoKeycloakServer spec
    KeycloakServer(KeycloakServerSpec),
    /// EntandoPlugin spec
    Plugin(PluginSpec),
    /// EntandoApp spec
    App(AppSpec),
    /// EntandoAppPluginLink spec
    AppPluginLink(AppPluginLinkSpec),
    /// Nested EntandoCompositeApp spec
    CompositeApp(Box<EntandoCompositeAppSpec>),
    /// EntandoDatabaseService spec
    DatabaseService(DatabaseServiceSpec),
}

impl ComponentSpec {
    /// Decode a raw spec for the given kind. A missing spec decodes as empty.
    pub fn decode(kind: ComponentKind, raw: Value) -> Result<Self, Error> {
        let raw = if raw.is_null() {
            Value::Object(Default::default())
        } else {
            raw
        };
        let spec = match kind {
            ComponentKind::KeycloakServer => Self::KeycloakServer(serde_json::from_value(raw)?),
            ComponentKind::Plugin => Self::Plugin(serde_json::from_value(raw)?),
            ComponentKind::App => Self::App(serde_json::from_value(raw)?),
            ComponentKind::AppPluginLink => Self::AppPluginLink(serde_json::from_value(raw)?),
            ComponentKind::CompositeApp => {
                Self::CompositeApp(Box::new(serde_json::from_value(raw)?))
            }
            ComponentKind::DatabaseService => Self::DatabaseService(serde_json::from_value(raw)?),
        };
        Ok(spec)
    }

    /// Serialize back to JSON, including any unrecognised fields
    pub fn to_value(&self) -> Result<Value, Error> {
        let value = match self {
            Self::KeycloakServer(s) => serde_json::to_value(s)?,
            Self::Plugin(s) => serde_json::to_value(s)?,
            Self::App(s) => serde_json::to_value(s)?,
            Self::AppPluginLink(s) => serde_json::to_value(s)?,
            Self::CompositeApp(s) => serde_json::to_value(s)?,
            Self::DatabaseService(s) => serde_json::to_value(s)?,
        };
        Ok(value)
    }

    /// Ingress-capable view of the spec, if the kind has one
    pub fn as_ingressing_mut(&mut self) -> Option<&mut dyn IngressingDeployment> {
        match self {
            Self::KeycloakServer(s) => Some(s),
            Self::Plugin(s) => Some(s),
            Self::App(s) => Some(s),
            Self::AppPluginLink(_) | Self::CompositeApp(_) | Self::DatabaseService(_) => None,
        }
    }
}

/// Spec of an EntandoKeycloakServer
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakServerSpec {
    /// Whether this is the default Keycloak server for the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,
    /// Database vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbms: Option<DbmsVendor>,
    /// Ingress hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_host_name: Option<String>,
    /// TLS secret for the ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,
    /// Replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Fields not modelled here, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Spec of an EntandoPlugin
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    /// Plugin image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Database vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbms: Option<DbmsVendor>,
    /// Ingress hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_host_name: Option<String>,
    /// TLS secret for the ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,
    /// Path the plugin is exposed under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_path: Option<String>,
    /// Health check path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
    /// Replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Fields not modelled here, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Spec of an EntandoApp
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Database vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbms: Option<DbmsVendor>,
    /// Ingress hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_host_name: Option<String>,
    /// TLS secret for the ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,
    /// Server image variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_server_image: Option<String>,
    /// Replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Fields not modelled here, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Spec of an EntandoAppPluginLink
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppPluginLinkSpec {
    /// Namespace of the app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entando_app_namespace: Option<String>,
    /// Name of the app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entando_app_name: Option<String>,
    /// Namespace of the plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entando_plugin_namespace: Option<String>,
    /// Name of the plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entando_plugin_name: Option<String>,
    /// Fields not modelled here, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Spec of an EntandoDatabaseService
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseServiceSpec {
    /// Database vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbms: Option<DbmsVendor>,
    /// External host, if not deployed in-cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    /// Whether to deploy a database server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_deployment: Option<bool>,
    /// Fields not modelled here, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(kind: &str, name: &str, spec: Value) -> ComponentEntry {
        ComponentEntry {
            kind: kind.to_string(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec,
        }
    }

    #[test]
    fn story_reference_entry_becomes_reference_variant() {
        let e = entry(
            REFERENCE_KIND,
            "reference-to-plugin",
            json!({"targetKind": "EntandoPlugin", "targetName": "avatar"}),
        );
        match e.to_component().unwrap() {
            Component::Reference(r) => {
                assert_eq!(r.target_kind, "EntandoPlugin");
                assert_eq!(r.target_name, "avatar");
                assert_eq!(r.target_namespace, None);
                assert_eq!(r.name.as_deref(), Some("reference-to-plugin"));
            }
            other => panic!("expected reference, got {other:?}"),
        }
    }

    #[test]
    fn reference_without_target_name_is_invalid() {
        let e = entry(REFERENCE_KIND, "r", json!({"targetKind": "EntandoPlugin"}));
        assert!(matches!(e.to_component(), Err(Error::Validation { .. })));
    }

    #[test]
    fn story_any_other_kind_is_inline() {
        let e = entry("EntandoWidget", "w", json!({}));
        assert!(matches!(e.to_component().unwrap(), Component::Inline(_)));
    }

    #[test]
    fn unknown_spec_fields_survive_decoding() {
        let raw = json!({
            "image": "entando/entando-avatar-plugin",
            "securityLevel": "strict",
            "ingressPath": "/avatarPlugin"
        });
        let spec = ComponentSpec::decode(ComponentKind::Plugin, raw.clone()).unwrap();
        assert_eq!(spec.to_value().unwrap(), raw);
    }

    #[test]
    fn missing_spec_decodes_as_empty() {
        let spec = ComponentSpec::decode(ComponentKind::KeycloakServer, Value::Null).unwrap();
        assert_eq!(spec, ComponentSpec::KeycloakServer(KeycloakServerSpec::default()));
    }

    #[test]
    fn wrongly_typed_field_is_a_serialization_error() {
        let result = ComponentSpec::decode(ComponentKind::Plugin, json!({"replicas": "two"}));
        assert!(matches!(result, Err(Error::Serialization { .. })));
    }

    #[test]
    fn only_ingressing_kinds_expose_the_capability() {
        for kind in ComponentKind::ALL {
            let mut spec = ComponentSpec::decode(*kind, json!({})).unwrap();
            let expected = matches!(
                kind,
                ComponentKind::KeycloakServer | ComponentKind::Plugin | ComponentKind::App
            );
            assert_eq!(spec.as_ingressing_mut().is_some(), expected, "{kind}");
        }
    }

    #[test]
    fn to_dynamic_strips_apply_rejected_metadata() {
        let component = TypedComponent {
            kind: ComponentKind::KeycloakServer,
            metadata: ObjectMeta {
                name: Some("kc".to_string()),
                namespace: Some("apps".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: ComponentSpec::KeycloakServer(KeycloakServerSpec {
                dbms: Some(DbmsVendor::None),
                ..Default::default()
            }),
        };
        let obj = component.to_dynamic().unwrap();
        assert_eq!(obj.metadata.resource_version, None);
        assert_eq!(obj.types.as_ref().unwrap().kind, "EntandoKeycloakServer");
        assert_eq!(obj.data["spec"]["dbms"], json!("none"));
    }
}
