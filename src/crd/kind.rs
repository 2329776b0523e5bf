//! Static registry of deployable component kinds
//!
//! Every kind a composite may contain, inline or by reference, is listed here
//! together with its API coordinates and the controller image that deploys it.

use kube::discovery::ApiResource;

/// API group shared by all Entando resources
pub const ENTANDO_GROUP: &str = "entando.org";

/// API version shared by all Entando resources
pub const ENTANDO_VERSION: &str = "v1";

/// Entry kind marking a component as a reference to an existing resource
pub const REFERENCE_KIND: &str = "EntandoCustomResourceReference";

/// Kinds of resources a composite can deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// EntandoKeycloakServer
    KeycloakServer,
    /// EntandoPlugin
    Plugin,
    /// EntandoApp
    App,
    /// EntandoAppPluginLink
    AppPluginLink,
    /// EntandoCompositeApp (nested composites)
    CompositeApp,
    /// EntandoDatabaseService
    DatabaseService,
}

impl ComponentKind {
    /// All supported kinds, in registry order
    pub const ALL: &'static [ComponentKind] = &[
        ComponentKind::KeycloakServer,
        ComponentKind::Plugin,
        ComponentKind::App,
        ComponentKind::AppPluginLink,
        ComponentKind::CompositeApp,
        ComponentKind::DatabaseService,
    ];

    /// Look up a kind by its Kubernetes Kind string (exact match)
    pub fn from_kind_str(kind: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.kind_str() == kind)
    }

    /// Kubernetes Kind string
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::KeycloakServer => "EntandoKeycloakServer",
            Self::Plugin => "EntandoPlugin",
            Self::App => "EntandoApp",
            Self::AppPluginLink => "EntandoAppPluginLink",
            Self::CompositeApp => "EntandoCompositeApp",
            Self::DatabaseService => "EntandoDatabaseService",
        }
    }

    /// Lower-case plural used in API paths
    pub fn plural(&self) -> String {
        format!("{}s", self.kind_str().to_lowercase())
    }

    /// Name of the controller image that deploys this kind
    pub fn controller_image(&self) -> &'static str {
        match self {
            Self::KeycloakServer => "entando-k8s-keycloak-controller",
            Self::Plugin => "entando-k8s-plugin-controller",
            Self::App => "entando-k8s-app-controller",
            Self::AppPluginLink => "entando-k8s-app-plugin-link-controller",
            Self::CompositeApp => "entando-k8s-composite-app-controller",
            Self::DatabaseService => "entando-k8s-database-service-controller",
        }
    }

    /// `group/version` string
    pub fn api_version(&self) -> String {
        format!("{ENTANDO_GROUP}/{ENTANDO_VERSION}")
    }

    /// Dynamic API resource for talking to this kind through `Api<DynamicObject>`
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: ENTANDO_GROUP.to_string(),
            version: ENTANDO_VERSION.to_string(),
            api_version: self.api_version(),
            kind: self.kind_str().to_string(),
            plural: self.plural(),
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_str())
    }
}
