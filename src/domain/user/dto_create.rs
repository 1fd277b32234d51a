use serde::{Deserialize, Serialize};
use validator::Validate;

use super::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CreateUserDto {
    #[validate(length(min = 1, message = "cannot be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "cannot be empty"))]
    pub password: String,
    #[validate(email(message = "has invalid format"))]
    pub email: String,
    #[validate(length(min = 1, message = "cannot be empty"))]
    pub full_name: String,
}

impl CreateUserDto {
    pub fn into_user(self, created_at: i64) -> User {
        User {
            name: self.name,
            password: self.password,
            email: self.email,
            full_name: self.full_name,
            created_at,
        }
    }
}
