//! Application services

pub mod cache_keys;
mod user;

pub use user::UserService;
