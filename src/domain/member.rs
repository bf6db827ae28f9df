//! Chat members: the participants of a chat's debt ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resolution::normalize::normalize_reference;

/// Chat identifier as assigned by the chat platform. Opaque to the core.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type alias for member IDs
pub type MemberId = Uuid;

/// A participant in a chat's debt ledger.
///
/// Members are never hard-deleted: ledger history must remain attributable.
/// A virtual member (no verified chat-platform account) can be merged into a
/// real one, after which the virtual row survives only as a tombstone with
/// `merged_into` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub chat_id: ChatId,
    /// Display name (original casing)
    pub display_name: String,
    /// Normalized name for matching
    pub display_name_norm: String,
    pub is_virtual: bool,
    /// Set when this member was merged away; the row is then a tombstone.
    pub merged_into: Option<MemberId>,
    pub created_at: DateTime<Utc>,
}

impl Member {
    /// A member sighted on the chat platform.
    pub fn real(chat_id: ChatId, display_name: &str) -> Self {
        Self::build(chat_id, display_name, false)
    }

    /// A member mentioned in the chat but never seen on the platform.
    pub fn virtual_member(chat_id: ChatId, display_name: &str) -> Self {
        Self::build(chat_id, display_name, true)
    }

    fn build(chat_id: ChatId, display_name: &str, is_virtual: bool) -> Self {
        Self {
            member_id: Uuid::new_v4(),
            chat_id,
            display_name: display_name.trim().to_string(),
            display_name_norm: normalize_reference(display_name),
            is_virtual,
            merged_into: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the member can still appear as a party in new mutations.
    pub fn is_active(&self) -> bool {
        self.merged_into.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_member_is_not_virtual() {
        let m = Member::real(ChatId(1), "Ngọc Long");
        assert!(!m.is_virtual);
        assert!(m.is_active());
        assert_eq!(m.display_name, "Ngọc Long");
        assert_eq!(m.display_name_norm, "ngọc long");
    }

    #[test]
    fn virtual_member_trims_display_name() {
        let m = Member::virtual_member(ChatId(1), "  Huy ");
        assert!(m.is_virtual);
        assert_eq!(m.display_name, "Huy");
    }

    #[test]
    fn tombstone_is_inactive() {
        let mut m = Member::virtual_member(ChatId(1), "Huy");
        m.merged_into = Some(Uuid::new_v4());
        assert!(!m.is_active());
    }
}
