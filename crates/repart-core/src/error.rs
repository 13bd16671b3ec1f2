//! Crate-wide error type.

use thiserror::Error;

/// Umbrella error for callers that drive the whole pipeline.
///
/// Each stage keeps its own error type; this exists so discovery,
/// classification, planning, and execution can be chained with `?`
/// from one entry point.
#[derive(Debug, Error)]
pub enum Error {
    /// Identifier validation failed.
    #[error(transparent)]
    Ident(#[from] crate::ident::IdentError),

    /// Metadata discovery failed.
    #[error(transparent)]
    Discovery(#[from] crate::engine::DiscoveryError),

    /// Target configuration rejected.
    #[error(transparent)]
    Target(#[from] crate::snapshot::TargetError),

    /// Classification rejected the requested transition.
    #[error(transparent)]
    Classify(#[from] crate::classify::ClassifyError),

    /// Plan-level validation failed.
    #[error(transparent)]
    Plan(#[from] crate::plan::PlanValidationError),

    /// The cutover swap failed.
    #[error(transparent)]
    Swap(#[from] crate::swap::SwapError),

    /// The partition exchange saga failed.
    #[error(transparent)]
    Saga(#[from] crate::exchange::SagaError),

    /// State persistence failed.
    #[error(transparent)]
    State(#[from] crate::state::StateError),

    /// Configuration persistence failed.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// The external engine reported a statement failure.
    #[error(transparent)]
    Engine(#[from] crate::engine::EngineError),

    /// Plan execution could not be driven.
    #[error(transparent)]
    Executor(#[from] crate::executor::ExecutorError),
}
