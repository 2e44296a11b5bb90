//! Who else is on the board, and where their cursor was last seen.

use crate::object::ParticipantId;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A remote participant as seen through the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Point>,
}

/// Remote participants keyed by address. The local participant never
/// appears here.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: BTreeMap<ParticipantId, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join. A repeated join refreshes the nickname.
    pub fn join(&mut self, id: ParticipantId, nickname: String) {
        self.participants
            .entry(id.clone())
            .and_modify(|p| p.nickname = nickname.clone())
            .or_insert(Participant {
                id,
                nickname,
                cursor: None,
            });
    }

    pub fn leave(&mut self, id: &ParticipantId) -> bool {
        self.participants.remove(id).is_some()
    }

    pub fn rename(&mut self, id: &ParticipantId, nickname: String) -> bool {
        match self.participants.get_mut(id) {
            Some(p) => {
                p.nickname = nickname;
                true
            }
            None => false,
        }
    }

    /// Update a participant's cursor. Cursors of participants that have not
    /// joined are ignored.
    pub fn move_cursor(&mut self, id: &ParticipantId, position: Point) -> bool {
        match self.participants.get_mut(id) {
            Some(p) => {
                p.cursor = Some(position);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
