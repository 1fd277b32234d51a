//! Asynchronous user request pipeline
//!
//! ```text
//! Receiver ──validate──▶ Validator ──data──▶ Data ──mailing──▶ Mailing ──▶ caller
//!                            │                 │                 ▲
//!                            └──────error──────┴──────error──────┘
//! ```
//!
//! Every stage after the receiver runs its own consumer task; see
//! [`consumer`] for the commit and retry rules they share.

pub mod consumer;
mod data;
mod error;
mod mailing;
mod receiver;
pub mod topics;
mod validator;


use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

pub use consumer::{spawn_stage, ConsumerSettings, StageHandler};
pub use data::DataStage;
pub use error::{PipelineError, ReceiverError};
pub use mailing::{FaultInjection, MailingStage};
pub use receiver::{Receiver, ReceiverSettings};
pub use validator::ValidatorStage;

use crate::application::ports::{Cache, MessageBroker, SharedMetrics};
use crate::application::services::UserService;
use crate::support::ShutdownSignal;

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub consumer: ConsumerSettings,
    /// Deadline for each business-core call made by the data stage.
    pub operation_timeout: Duration,
    /// Lifetime of `result:*` entries.
    pub result_ttl: Duration,
    pub fault_injection: FaultInjection,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            consumer: ConsumerSettings::default(),
            operation_timeout: Duration::from_secs(5),
            result_ttl: Duration::from_secs(600),
            fault_injection: FaultInjection::disabled(),
        }
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Start the validator, data and mailing consumers.
    pub fn spawn(
        broker: Arc<dyn MessageBroker>,
        cache: Arc<dyn Cache>,
        service: Arc<UserService>,
        metrics: SharedMetrics,
        settings: PipelineSettings,
        shutdown: ShutdownSignal,
    ) -> PipelineHandle {
        let stages: Vec<Arc<dyn StageHandler>> = vec![
            Arc::new(ValidatorStage::new(broker.clone())),
            Arc::new(DataStage::new(
                broker.clone(),
                service,
                settings.operation_timeout,
            )),
            Arc::new(MailingStage::new(
                cache,
                metrics,
                settings.result_ttl,
                settings.fault_injection,
            )),
        ];

        let tasks = stages
            .into_iter()
            .map(|stage| {
                let name = stage.name();
                let task = spawn_stage(stage, broker.clone(), settings.consumer, shutdown.clone());
                (name, task)
            })
            .collect();

        info!("🚀 Pipeline started");
        PipelineHandle { tasks, shutdown }
    }
}

/// Running stage tasks.
pub struct PipelineHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: ShutdownSignal,
}

impl PipelineHandle {
    /// `true` while every stage task is alive.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().all(|(_, task)| !task.is_finished())
    }

    /// Signal every stage to stop and wait for them.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    /// Wait for every stage task to finish.
    pub async fn join(self) {
        for (name, task) in self.tasks {
            match task.await {
                Ok(()) => info!(stage = name, "Stage joined"),
                Err(e) => error!(stage = name, error = %e, "Stage task panicked"),
            }
        }
    }
}

#[cfg(test)]
mod handle_tests {
    use super::*;

    #[tokio::test]
    async fn one_dead_stage_means_not_running() {
        let shutdown = ShutdownSignal::new();
        let alive = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        let dead = tokio::spawn(async {});
        let handle = PipelineHandle {
            tasks: vec![("alive", alive), ("dead", dead)],
            shutdown,
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_running());
        handle.shutdown().await;
    }
}
