pub mod envelope;
pub mod user;

// Re-export commonly used types
pub use envelope::{
    CorrelationId, DeliveryMode, Envelope, EnvelopeError, Headers, HEADER_CORRELATION_ID,
    HEADER_DELIVERY_MODE, HEADER_TRACE_CONTEXT,
};
pub use user::{
    CreateUserDto, ListParams, ListUsersDto, UpdateUserDto, User, UserNameDto, UserStore,
};

// Re-export DomainError from support for convenience
pub use crate::support::errors::{DomainError, DomainResult};
