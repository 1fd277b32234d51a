use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ListParams;

/// Addresses a single user (get, delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct UserNameDto {
    #[validate(length(min = 1, message = "cannot be empty"))]
    pub name: String,
}

impl UserNameDto {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ListUsersDto {
    #[serde(default)]
    pub order: bool,
    #[validate(range(min = 1, max = 1000, message = "must be between 1 and 1000"))]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

impl From<ListUsersDto> for ListParams {
    fn from(dto: ListUsersDto) -> Self {
        ListParams::new(dto.order, dto.limit, dto.offset)
    }
}
