//! Secret lifecycle: `Absent → ContainerCreated → VersionWritten →
//! AccessGranted → Mounted`.
//!
//! Phases only move forward. A stack's secret reaches each phase when the
//! resource that produces it is applied, so the graph must order those
//! resources accordingly.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::graph::{GapReason, OrderingGap, StackGraph};
use crate::types::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretPhase {
    Absent,
    ContainerCreated,
    VersionWritten,
    AccessGranted,
    Mounted,
}

impl SecretPhase {
    /// Phase reached once a resource of `kind` is applied.
    pub fn reached_by(kind: ResourceKind) -> Option<SecretPhase> {
        match kind {
            ResourceKind::SecretContainer => Some(SecretPhase::ContainerCreated),
            ResourceKind::SecretVersion => Some(SecretPhase::VersionWritten),
            ResourceKind::SecretAccessGrant => Some(SecretPhase::AccessGranted),
            ResourceKind::ManagedService => Some(SecretPhase::Mounted),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SecretPhase::Absent => "absent",
            SecretPhase::ContainerCreated => "container-created",
            SecretPhase::VersionWritten => "version-written",
            SecretPhase::AccessGranted => "access-granted",
            SecretPhase::Mounted => "mounted",
        }
    }
}

impl fmt::Display for SecretPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("secret {secret} cannot move from {from} back to {to}")]
    Regression {
        secret: String,
        from: SecretPhase,
        to: SecretPhase,
    },
}

/// Tracks one secret through its phases.
#[derive(Debug, Clone)]
pub struct SecretLifecycle {
    secret: String,
    phase: SecretPhase,
}

impl SecretLifecycle {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            phase: SecretPhase::Absent,
        }
    }

    pub fn phase(&self) -> SecretPhase {
        self.phase
    }

    /// Move to `to`. Re-entering the current phase is a no-op that returns
    /// `false`; skipping ahead is allowed; going back is an error.
    pub fn advance(&mut self, to: SecretPhase) -> Result<bool, LifecycleError> {
        if to < self.phase {
            return Err(LifecycleError::Regression {
                secret: self.secret.clone(),
                from: self.phase,
                to,
            });
        }
        if to == self.phase {
            return Ok(false);
        }
        debug!(secret = %self.secret, from = %self.phase, %to, "secret phase advanced");
        self.phase = to;
        Ok(true)
    }
}

/// Consecutive lifecycle phases whose producing resources are not ordered
/// by the graph's edges.
pub(crate) fn lifecycle_gaps(graph: &StackGraph) -> Vec<OrderingGap> {
    let stages: Vec<(SecretPhase, Vec<&str>)> = [
        ResourceKind::SecretContainer,
        ResourceKind::SecretVersion,
        ResourceKind::SecretAccessGrant,
        ResourceKind::ManagedService,
    ]
    .into_iter()
    .filter_map(|kind| {
        let names: Vec<&str> = graph.resources_of_kind(kind).map(|r| r.name.as_str()).collect();
        let phase = SecretPhase::reached_by(kind)?;
        (!names.is_empty()).then_some((phase, names))
    })
    .collect();

    let mut gaps = Vec::new();
    for pair in stages.windows(2) {
        let (before, earlier) = &pair[0];
        let (after, later) = &pair[1];
        for &prerequisite in earlier {
            for &resource in later {
                if !graph.is_ordered_before(prerequisite, resource) {
                    gaps.push(OrderingGap {
                        resource: resource.to_string(),
                        prerequisite: prerequisite.to_string(),
                        reason: GapReason::Lifecycle {
                            before: *before,
                            after: *after,
                        },
                    });
                }
            }
        }
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut lc = SecretLifecycle::new("api-key");
        assert!(lc.advance(SecretPhase::ContainerCreated).unwrap());
        assert!(lc.advance(SecretPhase::VersionWritten).unwrap());
        assert!(!lc.advance(SecretPhase::VersionWritten).unwrap());
        assert!(lc.advance(SecretPhase::Mounted).unwrap());
        assert_eq!(lc.phase(), SecretPhase::Mounted);
    }

    #[test]
    fn test_regression_rejected() {
        let mut lc = SecretLifecycle::new("api-key");
        lc.advance(SecretPhase::AccessGranted).unwrap();
        let err = lc.advance(SecretPhase::VersionWritten).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::Regression {
                secret: "api-key".to_string(),
                from: SecretPhase::AccessGranted,
                to: SecretPhase::VersionWritten,
            }
        );
        assert_eq!(lc.phase(), SecretPhase::AccessGranted);
    }

    #[test]
    fn test_phase_for_kind() {
        assert_eq!(
            SecretPhase::reached_by(ResourceKind::SecretVersion),
            Some(SecretPhase::VersionWritten)
        );
        assert_eq!(SecretPhase::reached_by(ResourceKind::ContainerImage), None);
    }
}
