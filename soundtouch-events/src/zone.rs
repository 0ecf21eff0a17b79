//! Synchronized-playback zone types.
//!
//! A zone is a set of speakers playing the same audio, fed by exactly one
//! master. Zone identity is keyed by the master's device id. Membership is
//! a set: a device appears at most once, and the master is always a member
//! of its own zone.

use crate::update::DeviceId;
use serde::{Deserialize, Serialize};

/// A playback zone: one master plus its members.
///
/// Fields are private so the set invariants (no duplicate members, master
/// always a member) cannot be broken from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    master: DeviceId,
    members: Vec<DeviceId>,
}

impl Zone {
    /// Create a zone with `master` feeding `member`.
    ///
    /// The master is included in the member set.
    pub fn new(master: DeviceId, member: DeviceId) -> Self {
        let mut zone = Self {
            members: vec![master.clone()],
            master,
        };
        zone.add_member(member);
        zone
    }

    pub fn master(&self) -> &DeviceId {
        &self.master
    }

    pub fn members(&self) -> &[DeviceId] {
        &self.members
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.members.iter().any(|m| m == id)
    }

    pub fn is_master(&self, id: &DeviceId) -> bool {
        &self.master == id
    }

    /// Add a member, preserving set semantics.
    ///
    /// Returns `false` if the device was already a member.
    pub fn add_member(&mut self, id: DeviceId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.members.push(id);
        true
    }

    /// Remove a member. Returns `false` if the device was not a member.
    pub fn remove_member(&mut self, id: &DeviceId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != id);
        self.members.len() != before
    }
}
