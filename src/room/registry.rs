//! Room membership bookkeeping. Pure data, no I/O.

use crate::peer::types::{ParticipantId, RoomId};
use std::collections::HashMap;

/// Rooms never hold more than this many participants.
pub const ROOM_CAPACITY: usize = 2;

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    /// Arrival order.
    pub members: Vec<ParticipantId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            members: Vec::with_capacity(ROOM_CAPACITY),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= ROOM_CAPACITY
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First arrival; nobody to pair with yet.
    Waiting,
    /// Second arrival. `existing` is told `user-joined(joiner)`, `joiner` is
    /// told `other-user(existing)`.
    Paired {
        existing: ParticipantId,
        joiner: ParticipantId,
    },
    /// Already a member of this room; nothing changes.
    AlreadyMember,
    Full,
    InvalidRoom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: RoomId,
    /// Member left behind, if the room survived.
    pub remaining: Option<ParticipantId>,
    /// How long the room existed, set when this departure destroyed it.
    pub lifetime: Option<chrono::TimeDelta>,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    membership: HashMap<ParticipantId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn room_of(&self, participant: &ParticipantId) -> Option<&RoomId> {
        self.membership.get(participant)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Seats `participant` in `room`. A participant in another room leaves it
    /// first, even when the new room turns out to be full; the departure is
    /// returned so the caller can notify the old room.
    pub fn join(
        &mut self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> (JoinOutcome, Option<Departure>) {
        if room.0.trim().is_empty() {
            return (JoinOutcome::InvalidRoom, None);
        }
        if self.membership.get(participant) == Some(room) {
            return (JoinOutcome::AlreadyMember, None);
        }
        let departure = self.leave(participant);
        if self.rooms.get(room).is_some_and(Room::is_full) {
            return (JoinOutcome::Full, departure);
        }

        let entry = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(room.clone()));
        let existing = entry.members.first().cloned();
        entry.members.push(participant.clone());
        self.membership.insert(participant.clone(), room.clone());

        let outcome = match existing {
            None => JoinOutcome::Waiting,
            Some(existing) => JoinOutcome::Paired {
                existing,
                joiner: participant.clone(),
            },
        };
        (outcome, departure)
    }

    /// Removes `participant` from its room, destroying the room when it empties.
    pub fn leave(&mut self, participant: &ParticipantId) -> Option<Departure> {
        let room_id = self.membership.remove(participant)?;
        let room = self.rooms.get_mut(&room_id)?;
        room.members.retain(|m| m != participant);

        let remaining = room.members.first().cloned();
        let lifetime = if room.members.is_empty() {
            let created_at = room.created_at;
            self.rooms.remove(&room_id);
            Some(chrono::Utc::now() - created_at)
        } else {
            None
        };
        Some(Departure {
            room: room_id,
            remaining,
            lifetime,
        })
    }

    /// The other member of `participant`'s room.
    pub fn room_mate(&self, participant: &ParticipantId) -> Option<&ParticipantId> {
        let room = self.rooms.get(self.membership.get(participant)?)?;
        room.members.iter().find(|m| *m != participant)
    }
}
