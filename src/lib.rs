//! # User pipeline
//!
//! Asynchronous user CRUD service. Requests enter through the
//! [`Receiver`](application::Receiver), travel over broker topics through the
//! validator, data and mailing stages, and reach the caller either as a
//! push on a cache channel or as a stored result to poll.
//!
//! ## Architecture
//!
//! - **domain**: users, DTOs, the correlation envelope and the store port
//! - **application**: business core (cache-aside), pipeline stages, ports
//! - **infrastructure**: memory and SeaORM stores, in-process broker and
//!   cache, metrics sinks
//! - **support**: errors, deadlines, shutdown, trace context

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod server;
pub mod support;

pub use config::{default_config_path, AppConfig, StoreBackend};

pub use application::{Outcome, Receiver, UserRequest, UserService};
pub use domain::{CorrelationId, DeliveryMode, User};
pub use infrastructure::{init_database, DatabaseConfig};
pub use support::AppError;
