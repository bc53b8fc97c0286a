//! Negotiation lifecycle and role

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation state of a peer
///
/// States only move forward. Having applied a remote description is tracked
/// separately, since it can happen at any point after `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// No transport yet
    Idle,
    /// Transport allocated
    Created,
    /// Offer requested from the transport
    Offering,
    /// Answer requested from the transport
    Answering,
    /// Local description committed
    LocalSet,
    /// Candidates are being gathered
    GatheringIce,
    /// Gathering finished, the local description is complete
    Ready,
    /// Transport discarded
    Closed,
}

impl NegotiationState {
    fn rank(self) -> u8 {
        match self {
            NegotiationState::Idle => 0,
            NegotiationState::Created => 1,
            NegotiationState::Offering | NegotiationState::Answering => 2,
            NegotiationState::LocalSet => 3,
            NegotiationState::GatheringIce => 4,
            NegotiationState::Ready => 5,
            NegotiationState::Closed => 6,
        }
    }

    /// Whether moving to `next` is a forward transition
    pub fn can_advance_to(self, next: NegotiationState) -> bool {
        self != NegotiationState::Closed && next.rank() > self.rank()
    }

    /// Whether the transport has been allocated and not yet closed
    pub fn has_transport(self) -> bool {
        !matches!(self, NegotiationState::Idle | NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationState::Idle => write!(f, "idle"),
            NegotiationState::Created => write!(f, "created"),
            NegotiationState::Offering => write!(f, "offering"),
            NegotiationState::Answering => write!(f, "answering"),
            NegotiationState::LocalSet => write!(f, "local_set"),
            NegotiationState::GatheringIce => write!(f, "gathering_ice"),
            NegotiationState::Ready => write!(f, "ready"),
            NegotiationState::Closed => write!(f, "closed"),
        }
    }
}

/// Side of the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// First joiner, creates the offer
    Master,
    /// Later joiner, answers
    Slave,
    /// No role notice received yet
    #[default]
    Undetermined,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
            Role::Undetermined => write!(f, "undetermined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        use NegotiationState::*;
        assert!(Idle.can_advance_to(Created));
        assert!(Created.can_advance_to(Offering));
        assert!(Offering.can_advance_to(LocalSet));
        assert!(!Ready.can_advance_to(LocalSet));
        assert!(!Offering.can_advance_to(Answering));
        assert!(Ready.can_advance_to(Closed));
        assert!(!Closed.can_advance_to(Closed));
    }

    #[test]
    fn test_has_transport() {
        assert!(!NegotiationState::Idle.has_transport());
        assert!(NegotiationState::GatheringIce.has_transport());
        assert!(!NegotiationState::Closed.has_transport());
    }

    #[test]
    fn test_display() {
        assert_eq!(NegotiationState::GatheringIce.to_string(), "gathering_ice");
        assert_eq!(Role::default().to_string(), "undetermined");
    }
}
