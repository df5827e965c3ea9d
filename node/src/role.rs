//! The closed role state machine of a single node
//!
//! Every change to a node's own role goes through [`Phase::apply`], so the
//! full set of legal moves lives in one match and can be tested without any
//! networking.

use shared::NodeRole;
use thiserror::Error;

/// Where this node stands in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not part of any session yet
    Idle,
    Active(NodeRole),
    /// Left the session or the session ended; nothing further happens.
    Terminated,
}

/// Event that may move a node to another phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    HostStarted,
    /// A join was sent asking for the given role.
    JoinRequested(NodeRole),
    OwnSnakeDied,
    /// The deputy stopped hearing from the master.
    MasterSilent,
    /// A RoleChange assigned this node a role.
    Assigned(NodeRole),
    Leave,
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal role transition from {from:?} on {trigger:?}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub trigger: Trigger,
}

impl Phase {
    /// Computes the phase after `trigger`; illegal triggers leave `self` untouched.
    pub fn apply(self, trigger: Trigger) -> Result<Phase, IllegalTransition> {
        use NodeRole::*;

        let next = match (self, trigger) {
            (Phase::Idle, Trigger::HostStarted) => Phase::Active(Master),
            (Phase::Idle, Trigger::JoinRequested(role @ (Normal | Viewer))) => Phase::Active(role),
            (Phase::Active(Master), Trigger::OwnSnakeDied) => Phase::Active(Viewer),
            (Phase::Active(Deputy), Trigger::MasterSilent) => Phase::Active(Master),
            (Phase::Active(_), Trigger::Assigned(role)) => Phase::Active(role),
            (Phase::Active(_), Trigger::Leave | Trigger::SessionEnded) => Phase::Terminated,
            (from, trigger) => return Err(IllegalTransition { from, trigger }),
        };
        Ok(next)
    }

    pub fn role(&self) -> Option<NodeRole> {
        match self {
            Phase::Active(role) => Some(*role),
            _ => None,
        }
    }

    pub fn is_master(&self) -> bool {
        *self == Phase::Active(NodeRole::Master)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Active(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_join_entry_points() {
        assert_eq!(
            Phase::Idle.apply(Trigger::HostStarted),
            Ok(Phase::Active(NodeRole::Master))
        );
        assert_eq!(
            Phase::Idle.apply(Trigger::JoinRequested(NodeRole::Viewer)),
            Ok(Phase::Active(NodeRole::Viewer))
        );
        assert!(Phase::Idle
            .apply(Trigger::JoinRequested(NodeRole::Master))
            .is_err());
    }

    #[test]
    fn test_only_deputy_self_promotes() {
        let deputy = Phase::Active(NodeRole::Deputy);
        assert_eq!(
            deputy.apply(Trigger::MasterSilent),
            Ok(Phase::Active(NodeRole::Master))
        );

        let normal = Phase::Active(NodeRole::Normal);
        let err = normal.apply(Trigger::MasterSilent).unwrap_err();
        assert_eq!(err.from, normal);
    }

    #[test]
    fn test_master_death_demotes_to_viewer() {
        let master = Phase::Active(NodeRole::Master);
        assert_eq!(
            master.apply(Trigger::OwnSnakeDied),
            Ok(Phase::Active(NodeRole::Viewer))
        );
        assert!(Phase::Active(NodeRole::Normal)
            .apply(Trigger::OwnSnakeDied)
            .is_err());
    }

    #[test]
    fn test_assignment_overrides_any_active_role() {
        for role in [NodeRole::Normal, NodeRole::Deputy, NodeRole::Viewer] {
            assert_eq!(
                Phase::Active(role).apply(Trigger::Assigned(NodeRole::Master)),
                Ok(Phase::Active(NodeRole::Master))
            );
        }
        assert!(Phase::Idle.apply(Trigger::Assigned(NodeRole::Deputy)).is_err());
    }

    #[test]
    fn test_terminated_is_final() {
        let ended = Phase::Active(NodeRole::Normal)
            .apply(Trigger::Leave)
            .unwrap();
        assert_eq!(ended, Phase::Terminated);
        assert!(ended.apply(Trigger::HostStarted).is_err());
        assert!(ended.apply(Trigger::Assigned(NodeRole::Master)).is_err());
        assert!(ended.role().is_none());
    }
}
