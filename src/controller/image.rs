//! Controller image resolution
//!
//! Maps a component kind to the image of the controller that deploys it and
//! qualifies it as `[registry/]organization/image[:version]`. A
//! `RELATED_IMAGE_<IMAGE>` pin replaces the computed reference entirely.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::crd::ComponentKind;
use crate::Error;

/// Per-image settings, as stored in the docker image info ConfigMap
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ImageOverride {
    /// Version (tag) to use for this image
    #[serde(default)]
    pub version: Option<String>,
    /// Registry to pull this image from
    #[serde(default)]
    pub registry: Option<String>,
    /// Organization the image lives under
    #[serde(default)]
    pub organization: Option<String>,
}

impl ImageOverride {
    /// Parse one ConfigMap entry (a JSON document)
    pub fn parse(image: &str, json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| {
            Error::validation(format!("invalid image settings for {image}: {e}"))
        })
    }
}

/// Registry, organization and version defaults for controller images
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageConfig {
    /// Default registry; images resolve without one when unset
    pub registry: Option<String>,
    /// Default organization
    pub organization: String,
    /// Default version; images resolve untagged when unset
    pub default_version: Option<String>,
    /// Settings keyed by image name (e.g. `entando-k8s-plugin-controller`)
    pub overrides: BTreeMap<String, ImageOverride>,
    /// Fully qualified pins keyed by `RELATED_IMAGE_*` variable name
    pub pinned: BTreeMap<String, String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            registry: None,
            organization: "entando".to_string(),
            default_version: None,
            overrides: BTreeMap::new(),
            pinned: BTreeMap::new(),
        }
    }
}

/// `entando-k8s-plugin-controller` -> `RELATED_IMAGE_ENTANDO_K8S_PLUGIN_CONTROLLER`
pub fn related_image_variable(image: &str) -> String {
    format!(
        "RELATED_IMAGE_{}",
        image.to_ascii_uppercase().replace(['-', '.'], "_")
    )
}

/// Resolves controller images for component kinds
#[derive(Clone, Debug, Default)]
pub struct ImageResolver {
    config: ImageConfig,
}

impl ImageResolver {
    /// Create a resolver over the given settings
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }

    /// Resolve the image for a resource kind string; a kind missing from
    /// the image table is `Error::UnresolvedImage`
    pub fn resolve_kind(&self, kind: &str, version: Option<&str>) -> Result<String, Error> {
        let kind = ComponentKind::from_kind_str(kind).ok_or_else(|| Error::unresolved_image(kind))?;
        Ok(self.resolve(kind, version))
    }

    /// Fully qualified image reference for `kind`.
    ///
    /// Version precedence: `version`, then the per-image override, then the
    /// configured default. A `RELATED_IMAGE_*` pin wins over all of them.
    pub fn resolve(&self, kind: ComponentKind, version: Option<&str>) -> String {
        let image = kind.controller_image();

        if let Some(pinned) = self.config.pinned.get(&related_image_variable(image)) {
            return pinned.clone();
        }

        let over = self.config.overrides.get(image);
        let registry = over
            .and_then(|o| o.registry.as_deref())
            .or(self.config.registry.as_deref());
        let organization = over
            .and_then(|o| o.organization.as_deref())
            .unwrap_or(&self.config.organization);
        let version = version
            .or_else(|| over.and_then(|o| o.version.as_deref()))
            .or(self.config.default_version.as_deref());

        let mut reference = String::new();
        if let Some(registry) = registry.filter(|r| !r.is_empty()) {
            reference.push_str(registry.trim_end_matches('/'));
            reference.push('/');
        }
        reference.push_str(organization);
        reference.push('/');
        reference.push_str(image);
        if let Some(version) = version.filter(|v| !v.is_empty()) {
            reference.push(':');
            reference.push_str(version);
        }
        reference
    }
}
