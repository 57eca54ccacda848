use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name
    pub username: String,
    /// Contact handle, unique across all users
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Canonical form of a contact handle: trimmed and lower-cased, so
/// "A@X.com " and "a@x.com" are the same contact.
pub fn normalize_contact(contact: &str) -> String {
    contact.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_contact() {
        assert_eq!(normalize_contact("  A@X.com "), "a@x.com");
        assert_eq!(normalize_contact("a@x.com"), "a@x.com");
        assert_eq!(normalize_contact("   "), "");
    }
}
