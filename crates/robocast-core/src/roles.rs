use std::sync::Arc;

use crate::events::{Participant, ParticipantId, Role};
use crate::participants::ParticipantRegistry;

/// Decides whether a connection originated from a trusted device integration.
pub trait SourcePolicy: Send + Sync {
    fn is_privileged(&self, id: ParticipantId) -> bool;
}

/// Ids at or above the floor are reserved for device clients.
#[derive(Debug, Clone, Copy)]
pub struct IdFloor(pub u64);

impl SourcePolicy for IdFloor {
    fn is_privileged(&self, id: ParticipantId) -> bool {
        id.0 >= self.0
    }
}

impl<F> SourcePolicy for F
where
    F: Fn(ParticipantId) -> bool + Send + Sync,
{
    fn is_privileged(&self, id: ParticipantId) -> bool {
        self(id)
    }
}

/// Host/viewer election for participants that start publishing video.
#[derive(Clone)]
pub struct RoleClassifier {
    policy: Arc<dyn SourcePolicy>,
}

impl RoleClassifier {
    pub fn new(policy: Arc<dyn SourcePolicy>) -> Self {
        Self { policy }
    }

    pub fn is_privileged(&self, id: ParticipantId) -> bool {
        self.policy.is_privileged(id)
    }

    /// Pure election rule.
    ///
    /// `privileged_source_live` is whether some other privileged participant
    /// currently has video. Without one, any publisher may take the vacant
    /// Host seat.
    pub fn classify(
        &self,
        participant: &Participant,
        current_host_exists: bool,
        privileged_source_live: bool,
    ) -> Role {
        if current_host_exists {
            return Role::Viewer;
        }
        if self.policy.is_privileged(participant.id) || !privileged_source_live {
            Role::Host
        } else {
            Role::Viewer
        }
    }

    /// Classify `participant` against the current registry contents.
    pub fn classify_in(&self, participant: &Participant, registry: &ParticipantRegistry) -> Role {
        let host_exists = registry.host().is_some_and(|host| host != participant.id);
        let privileged_live = registry
            .iter()
            .any(|p| p.id != participant.id && p.has_video && self.policy.is_privileged(p.id));
        self.classify(participant, host_exists, privileged_live)
    }
}

impl std::fmt::Debug for RoleClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleClassifier").finish_non_exhaustive()
    }
}
