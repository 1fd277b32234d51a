//! Application DTOs

mod outcome;
mod request;

pub use outcome::Outcome;
pub use request::{Operation, UnknownOperation, UserRequest};
