pub mod deadline;
pub mod errors;
pub mod shutdown;
pub mod trace;
pub mod validations;

pub use deadline::Deadline;
pub use errors::{AppError, DomainError, DomainResult, InfraError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use trace::TraceContext;
