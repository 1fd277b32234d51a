//! User aggregate
//!
//! Contains the User entity, DTOs, and the store interface.

pub mod model;
pub mod repository;

mod dto_create;
mod dto_get;
mod dto_update;

// Re-export model types
pub use model::{ListParams, User, MAX_LIST_LIMIT};

// Re-export DTOs
pub use dto_create::CreateUserDto;
pub use dto_get::{ListUsersDto, UserNameDto};
pub use dto_update::UpdateUserDto;

// Re-export repository trait
pub use repository::UserStore;
