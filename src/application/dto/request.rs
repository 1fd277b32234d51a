//! Pipeline request DTOs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::domain::{CreateUserDto, ListUsersDto, UpdateUserDto, UserNameDto};

/// Operation carried as the message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Get,
    List,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Get,
        Self::List,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Get => "get",
            Self::List => "list",
        }
    }

    /// Writes change the store; reads only look.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// A user request as it travels through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRequest {
    Create(CreateUserDto),
    Update(UpdateUserDto),
    Delete(UserNameDto),
    Get(UserNameDto),
    List(ListUsersDto),
}

impl UserRequest {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Create(_) => Operation::Create,
            Self::Update(_) => Operation::Update,
            Self::Delete(_) => Operation::Delete,
            Self::Get(_) => Operation::Get,
            Self::List(_) => Operation::List,
        }
    }

    /// JSON body of the message; the operation goes in the key.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Create(dto) => serde_json::to_vec(dto),
            Self::Update(dto) => serde_json::to_vec(dto),
            Self::Delete(dto) | Self::Get(dto) => serde_json::to_vec(dto),
            Self::List(dto) => serde_json::to_vec(dto),
        }
    }

    pub fn decode(operation: Operation, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match operation {
            Operation::Create => Self::Create(serde_json::from_slice(payload)?),
            Operation::Update => Self::Update(serde_json::from_slice(payload)?),
            Operation::Delete => Self::Delete(serde_json::from_slice(payload)?),
            Operation::Get => Self::Get(serde_json::from_slice(payload)?),
            Operation::List => Self::List(serde_json::from_slice(payload)?),
        })
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::Create(dto) => dto.validate(),
            Self::Update(dto) => dto.validate(),
            Self::Delete(dto) | Self::Get(dto) => dto.validate(),
            Self::List(dto) => dto.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_keys_parse_back() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
        }
        assert_eq!(
            "upsert".parse::<Operation>(),
            Err(UnknownOperation("upsert".into()))
        );
        assert!(Operation::Delete.is_write());
        assert!(!Operation::List.is_write());
    }

    #[test]
    fn update_payload_omits_absent_fields() {
        let req = UserRequest::Update(UpdateUserDto {
            name: "Ivan".into(),
            password: None,
            email: Some("i@x.com".into()),
            full_name: None,
        });
        let body = String::from_utf8(req.encode().unwrap()).unwrap();
        assert_eq!(body, r#"{"name":"Ivan","email":"i@x.com"}"#);
        assert_eq!(UserRequest::decode(Operation::Update, body.as_bytes()).unwrap(), req);
    }

    #[test]
    fn list_payload_defaults_order_and_offset() {
        let req = UserRequest::decode(Operation::List, br#"{"limit":3}"#).unwrap();
        assert_eq!(
            req,
            UserRequest::List(ListUsersDto {
                order: false,
                limit: 3,
                offset: 0
            })
        );
    }

    #[test]
    fn create_requires_every_field() {
        let err = UserRequest::decode(Operation::Create, br#"{"name":"Ivan"}"#);
        assert!(err.is_err());

        let blank = UserRequest::Create(CreateUserDto {
            name: "Ivan".into(),
            password: String::new(),
            email: "ivan@x.com".into(),
            full_name: "Ivan I".into(),
        });
        assert!(blank.validate().is_err());
    }
}
