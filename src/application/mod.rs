pub mod dto;
pub mod pipeline;
pub mod ports;
pub mod services;

// Re-export key types for convenience
pub use dto::{Operation, Outcome, UserRequest};
pub use pipeline::{
    FaultInjection, Pipeline, PipelineError, PipelineHandle, PipelineSettings, Receiver,
    ReceiverError, ReceiverSettings,
};
pub use ports::{Cache, MessageBroker, MetricsSink, SharedMetrics};
pub use services::UserService;
