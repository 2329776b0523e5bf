//! Controller configuration
//!
//! Everything the engine needs from its environment is collected once by the
//! binary into a [`ControllerConfig`] and passed in explicitly.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::controller::image::ImageConfig;

/// Default time to wait for stale execution units to disappear
pub const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time to wait for an execution unit to reach a terminal phase
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(1800);

/// Settings for one composite deployment run
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace execution units are created in
    pub controller_namespace: String,
    /// Service account execution units run as
    pub service_account: String,
    /// Remove succeeded execution units after each component
    pub garbage_collect_units: bool,
    /// Controller image settings
    pub images: ImageConfig,
    /// Explicit controller image version for this run
    pub image_version: Option<String>,
    /// Variables forwarded to every execution unit
    pub passthrough: BTreeMap<String, String>,
    /// Bound on waiting for stale units to be removed
    pub removal_timeout: Duration,
    /// Bound on waiting for a unit to finish
    pub completion_timeout: Duration,
}

impl ControllerConfig {
    /// Configuration with defaults for everything but the namespace
    pub fn new(controller_namespace: impl Into<String>) -> Self {
        Self {
            controller_namespace: controller_namespace.into(),
            service_account: "default".to_string(),
            garbage_collect_units: false,
            images: ImageConfig::default(),
            image_version: None,
            passthrough: BTreeMap::new(),
            removal_timeout: DEFAULT_REMOVAL_TIMEOUT,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }
}

/// Environment variables delegated controllers understand
pub fn is_passthrough_variable(name: &str) -> bool {
    name.starts_with("ENTANDO_") || name.starts_with("RELATED_IMAGE")
}

/// Normalize a dotted property (`entando.k8s.operator-x`) into the variable
/// a delegated controller reads (`ENTANDO_K8S_OPERATOR_X`).
///
/// Returns `None` for properties delegated controllers do not understand.
pub fn property_to_variable(property: &str) -> Option<String> {
    let dotted = property.to_ascii_lowercase().replace('_', ".");
    if !(dotted.starts_with("entando.") || dotted.starts_with("related.image")) {
        return None;
    }
    Some(property.to_ascii_uppercase().replace(['.', '-'], "_"))
}

/// Build the passthrough payload from dotted properties and environment
/// variables. Environment variables win over properties of the same name.
pub fn collect_passthrough<P, E>(properties: P, environment: E) -> BTreeMap<String, String>
where
    P: IntoIterator<Item = (String, String)>,
    E: IntoIterator<Item = (String, String)>,
{
    let mut payload: BTreeMap<String, String> = properties
        .into_iter()
        .filter_map(|(k, v)| property_to_variable(&k).map(|k| (k, v)))
        .collect();
    payload.extend(
        environment
            .into_iter()
            .filter(|(k, _)| is_passthrough_variable(k)),
    );
    payload
}

/// `RELATED_IMAGE_*` entries of a passthrough payload
pub fn related_images(passthrough: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    passthrough
        .iter()
        .filter(|(k, _)| k.starts_with("RELATED_IMAGE_"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
