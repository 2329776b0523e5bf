//! Integration tests for the composite application controller
//!
//! # Test Organization
//!
//! - `composite_crd`: Stories about storing EntandoCompositeApp resources and
//!   writing their status through the Kubernetes API
//!
//! - `unit_watch`: Stories about the pod watch delivering execution unit
//!   lifecycles to waiting deployments
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod composite_crd;
mod helpers;
mod unit_watch;
