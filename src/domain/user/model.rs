use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UpdateUserDto;

/// User model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub password: String,
    pub email: String,
    pub full_name: String,
    /// Unix seconds, assigned by the system on creation.
    pub created_at: i64,
}

impl User {
    /// Apply the fields an update carries. `name` and `created_at` never change.
    pub fn apply(&mut self, patch: &UpdateUserDto) {
        if let Some(ref password) = patch.password {
            self.password = password.clone();
        }
        if let Some(ref email) = patch.email {
            self.email = email.clone();
        }
        if let Some(ref full_name) = patch.full_name {
            self.full_name = full_name.clone();
        }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_at, 0)
    }
}

// Password is left out on purpose: this is what ends up in logs.
impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name: [{}], full_name: [{}], email: [{}], created_at: [{}]",
            self.name,
            self.full_name,
            self.email,
            self.created_at_utc()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| self.created_at.to_string())
        )
    }
}

/// Sort direction and window for listing users.
///
/// `order == false` sorts by name ascending, `true` descending. The window is
/// `[offset * limit, offset * limit + limit)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListParams {
    pub order: bool,
    pub limit: u64,
    pub offset: u64,
}

/// Largest page a list request may ask for.
pub const MAX_LIST_LIMIT: u64 = 1000;

impl ListParams {
    pub fn new(order: bool, limit: u64, offset: u64) -> Self {
        Self {
            order,
            limit,
            offset,
        }
    }

    /// First row index of the window, saturating on overflow.
    pub fn start(&self) -> u64 {
        self.offset.saturating_mul(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ivan() -> User {
        User {
            name: "Ivan".into(),
            password: "123".into(),
            email: "ivan@x.com".into(),
            full_name: "Ivan I".into(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn apply_patches_only_supplied_fields() {
        let mut user = ivan();
        user.apply(&UpdateUserDto {
            name: "Ivan".into(),
            password: None,
            email: Some("ivan@y.org".into()),
            full_name: None,
        });
        assert_eq!(user.email, "ivan@y.org");
        assert_eq!(user.password, "123");
        assert_eq!(user.full_name, "Ivan I");
        assert_eq!(user.created_at, 1_700_000_000);
    }

    #[test]
    fn display_hides_password() {
        let text = ivan().to_string();
        assert!(text.contains("name: [Ivan]"));
        assert!(!text.contains("123"));
    }

    #[test]
    fn list_window_start() {
        assert_eq!(ListParams::new(false, 3, 2).start(), 6);
        assert_eq!(ListParams::new(false, u64::MAX, 2).start(), u64::MAX);
    }
}
