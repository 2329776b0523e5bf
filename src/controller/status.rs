//! Aggregation of per-component outcomes into the composite status

use std::collections::BTreeMap;

use crate::crd::{ComponentStatus, CompositeStatus, DeploymentPhase};
use crate::executor::ExecutionOutcome;

/// Builds the composite status as components are processed
#[derive(Clone, Debug, Default)]
pub struct StatusAggregator {
    status: CompositeStatus,
}

impl StatusAggregator {
    /// Begin a run: phase `started`, earlier component entries kept
    pub fn start(previous: Option<&CompositeStatus>, generation: Option<i64>) -> Self {
        let components = previous.map(|s| s.components.clone()).unwrap_or_default();
        Self {
            status: CompositeStatus {
                phase: DeploymentPhase::Started,
                components,
                observed_generation: generation,
                message: None,
            },
        }
    }

    /// Record a unit's terminal phase under the deployed resource's name.
    ///
    /// Units from earlier runs were removed before this one was created, so
    /// only this unit is listed for the component. A failed unit fails the
    /// composite immediately.
    pub fn record(&mut self, name: &str, outcome: &ExecutionOutcome) {
        self.status.components.insert(
            name.to_string(),
            ComponentStatus {
                phase: outcome.phase,
                unit_phases: BTreeMap::from([(outcome.unit.clone(), outcome.phase)]),
            },
        );
        if outcome.has_failed() {
            self.status.phase = DeploymentPhase::Failed;
        }
    }

    /// Mark the composite failed with a message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status.phase = DeploymentPhase::Failed;
        self.status.message = Some(message.into());
    }

    /// Mark the composite successful after the last component
    pub fn succeed(&mut self) {
        self.status.phase = DeploymentPhase::Successful;
        self.status.message = None;
    }

    /// Current phase
    pub fn phase(&self) -> DeploymentPhase {
        self.status.phase
    }

    /// Current status document
    pub fn status(&self) -> &CompositeStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::UnitPhase;

    fn outcome(unit: &str, phase: UnitPhase) -> ExecutionOutcome {
        ExecutionOutcome {
            unit: unit.to_string(),
            phase,
        }
    }

    #[test]
    fn story_run_starts_then_succeeds() {
        let mut agg = StatusAggregator::start(None, Some(2));
        assert_eq!(agg.phase(), DeploymentPhase::Started);

        agg.record("kc", &outcome("kc-deployer-a1b2", UnitPhase::Succeeded));
        assert_eq!(agg.phase(), DeploymentPhase::Started);

        agg.succeed();
        let status = agg.status().clone();
        assert_eq!(status.phase, DeploymentPhase::Successful);
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(status.component("kc").unwrap().phase, UnitPhase::Succeeded);
    }

    #[test]
    fn story_failed_unit_fails_the_composite_at_once() {
        let mut agg = StatusAggregator::start(None, None);
        agg.record("avatar", &outcome("avatar-deployer-zz00", UnitPhase::Failed));
        assert_eq!(agg.phase(), DeploymentPhase::Failed);
        assert_eq!(
            agg.status().component("avatar").unwrap().unit_phases.get("avatar-deployer-zz00"),
            Some(&UnitPhase::Failed)
        );
    }

    #[test]
    fn new_run_keeps_earlier_components_but_resets_phase() {
        let mut previous = CompositeStatus::with_phase(DeploymentPhase::Failed).message("boom");
        previous.components.insert("kc".to_string(), ComponentStatus::default());

        let agg = StatusAggregator::start(Some(&previous), Some(3));
        assert_eq!(agg.phase(), DeploymentPhase::Started);
        assert!(agg.status().message.is_none());
        assert!(agg.status().component("kc").is_some());
    }

    #[test]
    fn rerecording_replaces_unit_list() {
        let mut agg = StatusAggregator::start(None, None);
        agg.record("kc", &outcome("kc-deployer-0001", UnitPhase::Failed));
        agg.record("kc", &outcome("kc-deployer-0002", UnitPhase::Succeeded));
        let kc = agg.status().component("kc").unwrap();
        assert_eq!(kc.unit_phases.len(), 1);
        assert_eq!(kc.phase, UnitPhase::Succeeded);
    }

    #[test]
    fn fail_sets_message() {
        let mut agg = StatusAggregator::start(None, None);
        agg.fail("unsupported component kind 'EntandoWidget'");
        assert_eq!(agg.phase(), DeploymentPhase::Failed);
        assert!(agg.status().message.as_deref().unwrap().contains("EntandoWidget"));
    }
}
