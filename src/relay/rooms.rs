//! # Room Registry
//!
//! Tracks which connections are in which room and which language each member
//! declared. Rooms are created on first join and destroyed as soon as their
//! last member leaves.
//!
//! ## Failure model:
//! Queries and removals on unknown rooms or connections are no-ops that return
//! empty results. A disconnect racing a message for the same room is normal
//! and must never be an error.
//!
//! ## Thread Safety:
//! A single `RwLock` guards the room table. Lookups used by fan-out take the
//! read lock; join/leave take the write lock briefly. No lock is held across
//! an `.await`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// One member of a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub connection_id: String,
    pub language: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Room {
    /// Members in join order, unique by connection id
    members: Vec<Member>,
    created_at: DateTime<Utc>,
}

/// Result of a join, used to tell the joiner who is already there.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// Normalized room identifier
    pub room_id: String,
    /// Members other than the joiner
    pub others: Vec<Member>,
    /// True when the connection was already a member and only its language changed
    pub rejoined: bool,
}

/// A room a connection was removed from, with whoever is still there.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub room_id: String,
    pub member: Member,
    pub remaining: Vec<String>,
}

/// Read-only room summary for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub member_count: usize,
    pub languages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection_id` to a room, or update its language if already a member.
    pub fn join(&self, room_id: &str, connection_id: &str, language: &str) -> JoinOutcome {
        let room_id = normalize_room_id(room_id);
        let language = language.trim().to_string();
        let mut rooms = self.rooms.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let room = rooms.entry(room_id.clone()).or_insert_with(|| Room {
            members: Vec::new(),
            created_at: Utc::now(),
        });

        let rejoined = match room.members.iter_mut().find(|m| m.connection_id == connection_id) {
            Some(existing) => {
                existing.language = language;
                true
            }
            None => {
                room.members.push(Member {
                    connection_id: connection_id.to_string(),
                    language,
                    joined_at: Utc::now(),
                });
                false
            }
        };

        let others = room
            .members
            .iter()
            .filter(|m| m.connection_id != connection_id)
            .cloned()
            .collect();

        JoinOutcome { room_id, others, rejoined }
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// Rooms left empty are deleted. Returns one [`Departure`] per room the
    /// connection was actually in.
    pub fn leave(&self, connection_id: &str) -> Vec<Departure> {
        let mut rooms = self.rooms.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut departures = Vec::new();

        for (room_id, room) in rooms.iter_mut() {
            if let Some(index) = room.members.iter().position(|m| m.connection_id == connection_id) {
                let member = room.members.remove(index);
                departures.push(Departure {
                    room_id: room_id.clone(),
                    member,
                    remaining: room.members.iter().map(|m| m.connection_id.clone()).collect(),
                });
            }
        }

        rooms.retain(|room_id, room| {
            let keep = !room.members.is_empty();
            if !keep {
                tracing::info!(room_id = %room_id, "Room deleted (empty)");
            }
            keep
        });

        departures
    }

    /// Distinct languages of every member except `excluding_connection_id`.
    pub fn target_languages(&self, room_id: &str, excluding_connection_id: &str) -> BTreeSet<String> {
        let rooms = self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        rooms
            .get(&normalize_room_id(room_id))
            .map(|room| {
                room.members
                    .iter()
                    .filter(|m| m.connection_id != excluding_connection_id)
                    .map(|m| m.language.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connection ids in the room whose declared language is `language`.
    pub fn members_speaking(&self, room_id: &str, language: &str) -> Vec<String> {
        let rooms = self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let language = language.trim();
        rooms
            .get(&normalize_room_id(room_id))
            .map(|room| {
                room.members
                    .iter()
                    .filter(|m| m.language == language)
                    .map(|m| m.connection_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every member of a room except `excluding_connection_id`.
    pub fn other_members(&self, room_id: &str, excluding_connection_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        rooms
            .get(&normalize_room_id(room_id))
            .map(|room| {
                room.members
                    .iter()
                    .filter(|m| m.connection_id != excluding_connection_id)
                    .map(|m| m.connection_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn members(&self, room_id: &str) -> Vec<Member> {
        let rooms = self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        rooms
            .get(&normalize_room_id(room_id))
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn member_count(&self) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|room| room.members.len())
            .sum()
    }

    /// Per-room summaries, sorted by room id.
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .map(|(room_id, room)| RoomSummary {
                room_id: room_id.clone(),
                member_count: room.members.len(),
                languages: room.members.iter().map(|m| m.language.clone()).collect(),
                created_at: room.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        summaries
    }
}

/// Room ids are case-insensitive and ignore surrounding whitespace.
pub fn normalize_room_id(room_id: &str) -> String {
    room_id.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(members: &[Member]) -> Vec<&str> {
        members.iter().map(|m| m.connection_id.as_str()).collect()
    }

    #[test]
    fn test_join_returns_existing_members() {
        let registry = RoomRegistry::new();
        let first = registry.join("R1", "x", "English");
        assert!(first.others.is_empty());
        assert!(!first.rejoined);

        let second = registry.join("R1", "y", "Spanish");
        assert_eq!(ids(&second.others), vec!["x"]);
        assert_eq!(registry.member_count(), 2);
    }

    #[test]
    fn test_rejoin_updates_language_without_duplicate() {
        let registry = RoomRegistry::new();
        registry.join("R1", "x", "English");
        registry.join("R1", "y", "Spanish");

        let outcome = registry.join("R1", "x", "French");
        assert!(outcome.rejoined);

        let members = registry.members("R1");
        assert_eq!(members.len(), 2);
        let x = members.iter().find(|m| m.connection_id == "x").unwrap();
        assert_eq!(x.language, "French");
    }

    #[test]
    fn test_room_ids_are_case_normalized() {
        let registry = RoomRegistry::new();
        registry.join("Lobby", "x", "English");
        let outcome = registry.join("  LOBBY ", "y", "German");

        assert_eq!(outcome.room_id, "lobby");
        assert_eq!(registry.room_count(), 1);
        assert_eq!(ids(&outcome.others), vec!["x"]);
    }

    #[test]
    fn test_membership_matches_join_leave_sequence() {
        let registry = RoomRegistry::new();
        registry.join("R1", "a", "English");
        registry.join("R1", "b", "Spanish");
        registry.join("R1", "c", "French");
        registry.join("R1", "b", "Spanish");
        registry.leave("a");
        registry.join("R1", "d", "German");
        registry.leave("c");

        let mut remaining: Vec<String> = registry.members("R1").into_iter().map(|m| m.connection_id).collect();
        remaining.sort();
        assert_eq!(remaining, vec!["b".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_leave_reports_remaining_members_per_room() {
        let registry = RoomRegistry::new();
        registry.join("R1", "x", "English");
        registry.join("R1", "y", "Spanish");
        registry.join("R2", "x", "English");

        let mut departures = registry.leave("x");
        departures.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        assert_eq!(departures.len(), 2);
        assert_eq!(departures[0].room_id, "r1");
        assert_eq!(departures[0].remaining, vec!["y".to_string()]);
        assert_eq!(departures[0].member.language, "English");
        assert_eq!(departures[1].room_id, "r2");
        assert!(departures[1].remaining.is_empty());

        // R2 had only x, so it is gone
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_last_member_leaving_removes_room() {
        let registry = RoomRegistry::new();
        registry.join("R1", "x", "English");
        registry.leave("x");

        assert_eq!(registry.room_count(), 0);
        assert!(registry.target_languages("R1", "anyone").is_empty());
        assert!(registry.members_speaking("R1", "English").is_empty());
    }

    #[test]
    fn test_target_languages_are_deduplicated() {
        let registry = RoomRegistry::new();
        registry.join("R1", "sender", "English");
        registry.join("R1", "a", "French");
        registry.join("R1", "b", "French");
        registry.join("R1", "c", "German");

        let targets: Vec<String> = registry.target_languages("R1", "sender").into_iter().collect();
        assert_eq!(targets, vec!["French".to_string(), "German".to_string()]);

        let mut french = registry.members_speaking("R1", "French");
        french.sort();
        assert_eq!(french, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unknown_room_is_a_no_op() {
        let registry = RoomRegistry::new();
        assert!(registry.target_languages("missing", "x").is_empty());
        assert!(registry.members_speaking("missing", "English").is_empty());
        assert!(registry.other_members("missing", "x").is_empty());
        assert!(registry.leave("nobody").is_empty());
    }

    #[test]
    fn test_summaries() {
        let registry = RoomRegistry::new();
        registry.join("b-room", "x", "English");
        registry.join("a-room", "y", "Spanish");
        registry.join("a-room", "z", "French");

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].room_id, "a-room");
        assert_eq!(summaries[0].member_count, 2);
        assert_eq!(summaries[0].languages, vec!["Spanish".to_string(), "French".to_string()]);
    }
}
