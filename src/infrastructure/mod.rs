//! Infrastructure layer - external concerns

pub mod broker;
pub mod cache;
pub mod database;
pub mod metrics;
pub mod storage;

pub use broker::InMemoryBroker;
pub use cache::{start_cache_sweeper, InMemoryCache};
pub use database::{init_database, DatabaseConfig, SeaOrmUserStore};
pub use metrics::{InMemoryMetrics, PrometheusMetrics};
pub use storage::BoundedMemoryStore;
