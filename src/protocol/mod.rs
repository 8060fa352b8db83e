// src/protocol/mod.rs
//! Protocol model, loader and summary

pub mod loader;
pub mod model;
pub mod summary;

pub use loader::ProtocolLoader;
pub use model::*;
pub use summary::{summarize, total_estimated, SummaryRow};

use thiserror::Error;

/// Load-time protocol errors; fatal to starting a run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("corrupt protocol: step '{step}' has no 'type' key")]
    MissingTypeKey { step: String },

    #[error("corrupt protocol: step '{step}' has unrecognized type '{found}'")]
    UnknownTypeKey { step: String, found: String },

    #[error("start step '{start_step}' is not in the protocol")]
    InvalidStartStep { start_step: String },

    #[error("malformed protocol{}: {reason}", .step.as_ref().map(|s| format!(" at step '{s}'")).unwrap_or_default())]
    Malformed { step: Option<String>, reason: String },

    #[error("step '{step}' uses unknown action '{action}'")]
    UnknownAction { step: String, action: String },

    #[error("step '{step}' action {action}: {reason}")]
    InvalidParameter {
        step: String,
        action: String,
        reason: String,
    },

    #[error("duplicate step name '{step}'")]
    DuplicateStep { step: String },

    #[error("protocol has no steps")]
    Empty,

    #[error("cannot read protocol: {0}")]
    Io(String),
}
