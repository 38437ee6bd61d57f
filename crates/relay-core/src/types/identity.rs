//! Recipient identity as known to the user directory.

use serde::{Deserialize, Serialize};

/// Deliverable contact information for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_phone_number_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_user_id: Option<String>,
}

fn default_role() -> String { "user".into() }

impl Identity {
    pub fn new(id: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            username: String::new(),
            role: default_role(),
            phone_number: None,
            is_phone_number_verified: false,
            slack_user_id: None,
        }
    }

    pub fn with_phone(mut self, phone: &str, verified: bool) -> Self {
        self.phone_number = Some(phone.to_string());
        self.is_phone_number_verified = verified;
        self
    }

    /// Phone number usable for calls and SMS: present, non-empty and verified.
    pub fn verified_phone(&self) -> Option<&str> {
        match self.phone_number.as_deref() {
            Some(phone) if self.is_phone_number_verified && !phone.is_empty() => Some(phone),
            _ => None,
        }
    }
}

/// Key used to look a user up in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    UserId(String),
    Email(String),
}

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserId(v) | Self::Email(v) => v,
        }
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserId(id) => write!(f, "id:{id}"),
            Self::Email(email) => write!(f, "email:{email}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verified_phone() {
        let unverified = Identity::new("u1", "a@x.com").with_phone("+100", false);
        assert_eq!(unverified.verified_phone(), None);

        let empty = Identity::new("u1", "a@x.com").with_phone("", true);
        assert_eq!(empty.verified_phone(), None);

        let ok = Identity::new("u1", "a@x.com").with_phone("+100", true);
        assert_eq!(ok.verified_phone(), Some("+100"));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(IdentityKey::UserId("U42".into()).to_string(), "id:U42");
        assert_eq!(IdentityKey::Email("a@x.com".into()).as_str(), "a@x.com");
    }
}
