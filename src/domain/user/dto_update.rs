use serde::{Deserialize, Serialize};
use validator::Validate;

/// Patch for an existing user, addressed by `name`.
///
/// Absent fields are left untouched; supplied ones must be valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct UpdateUserDto {
    #[validate(length(min = 1, message = "cannot be empty"))]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "cannot be empty"))]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "has invalid format"))]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "cannot be empty"))]
    pub full_name: Option<String>,
}

impl UpdateUserDto {
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.email.is_none() && self.full_name.is_none()
    }
}
