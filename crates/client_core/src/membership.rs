//! Keeps the client in exactly one realtime room: the active conversation.

use shared::{domain::ConversationId, protocol::ClientRequest};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoomMembership {
    #[default]
    Unjoined,
    JoinPending(ConversationId),
    Joined(ConversationId),
}

#[derive(Debug)]
pub struct RoomMembershipTracker {
    state: RoomMembership,
    confirm_optimistically: bool,
    track_leaves: bool,
}

impl RoomMembershipTracker {
    pub fn new(confirm_optimistically: bool, track_leaves: bool) -> Self {
        Self {
            state: RoomMembership::Unjoined,
            confirm_optimistically,
            track_leaves,
        }
    }

    pub fn state(&self) -> &RoomMembership {
        &self.state
    }

    /// The room the foreground view belongs to, joined or still pending.
    pub fn active_room(&self) -> Option<&ConversationId> {
        match &self.state {
            RoomMembership::Unjoined => None,
            RoomMembership::JoinPending(room) | RoomMembership::Joined(room) => Some(room),
        }
    }

    pub fn joined_room(&self) -> Option<&ConversationId> {
        match &self.state {
            RoomMembership::Joined(room) => Some(room),
            _ => None,
        }
    }

    /// Leaves the previous room (if any) and joins `room`.
    ///
    /// Returns the requests to publish, in order. Same-room switches are a no-op.
    pub fn switch_to(&mut self, room: ConversationId) -> Vec<ClientRequest> {
        if self.active_room() == Some(&room) {
            return Vec::new();
        }

        let mut requests = Vec::with_capacity(2);
        if let Some(previous) = self.active_room() {
            if self.track_leaves {
                requests.push(ClientRequest::Leave {
                    room: previous.clone(),
                });
            }
        }
        requests.push(ClientRequest::Join { room: room.clone() });
        debug!(room = %room, "membership: switching room");
        self.state = self.after_join(room);
        requests
    }

    /// Re-requests the active room on a fresh connection, which carries no membership.
    pub fn rejoin(&mut self) -> Option<ClientRequest> {
        let room = self.active_room()?.clone();
        self.state = self.after_join(room.clone());
        Some(ClientRequest::Join { room })
    }

    /// Records evidence from the server that `room` delivers to us.
    ///
    /// Returns true when this moved a pending join to joined.
    pub fn confirm(&mut self, room: &ConversationId) -> bool {
        match &self.state {
            RoomMembership::JoinPending(pending) if pending == room => {
                self.state = RoomMembership::Joined(room.clone());
                true
            }
            _ => false,
        }
    }

    fn after_join(&self, room: ConversationId) -> RoomMembership {
        if self.confirm_optimistically {
            RoomMembership::Joined(room)
        } else {
            RoomMembership::JoinPending(room)
        }
    }
}

impl Default for RoomMembershipTracker {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
