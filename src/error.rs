// src/error.rs
//! Unified error handling for ChipFlow core
//!
//! Component errors (`ProtocolError`, `HalError`, `ConfigError`,
//! `SequencerError`) are leaf enums owned by their modules. At the crate
//! boundary they are wrapped into [`EngineError`] together with an
//! [`ErrorContext`] naming the component and operation that failed.

use crate::config::ConfigError;
use crate::engine::SequencerError;
use crate::hal::HalError;
use crate::protocol::ProtocolError;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::time::SystemTime;

/// Unified error type for the engine and its hosts
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Protocol could not be loaded; fatal to starting a run
    Protocol {
        error: ProtocolError,
        context: ErrorContext,
    },

    /// Pump or switch driver failure
    Hardware {
        error: HalError,
        context: ErrorContext,
    },

    /// Configuration loading or validation failure
    Configuration {
        component: String,
        reason: String,
        context: ErrorContext,
    },

    /// Refused sequencer operation
    Sequencer {
        error: SequencerError,
        context: ErrorContext,
    },

    /// Host-level failure (I/O, runtime)
    System {
        subsystem: String,
        reason: String,
        context: ErrorContext,
    },
}

/// Error context for debugging and analysis
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub timestamp: SystemTime,
    pub thread_id: Option<String>,
    pub component: String,
    pub operation: String,
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

impl ErrorContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            timestamp: SystemTime::now(),
            thread_id: std::thread::current().name().map(str::to_string),
            component: component.to_string(),
            operation: operation.to_string(),
            file: None,
            line: None,
        }
    }

    /// Create error context with file and line information
    pub fn with_location(component: &str, operation: &str, file: &'static str, line: u32) -> Self {
        let mut context = Self::new(component, operation);
        context.file = Some(file);
        context.line = Some(line);
        context
    }
}

/// Macro for creating error context with file and line info
#[macro_export]
macro_rules! error_context {
    ($component:expr, $operation:expr) => {
        $crate::error::ErrorContext::with_location($component, $operation, file!(), line!())
    };
}

impl EngineError {
    pub fn context(&self) -> &ErrorContext {
        match self {
            EngineError::Protocol { context, .. }
            | EngineError::Hardware { context, .. }
            | EngineError::Configuration { context, .. }
            | EngineError::Sequencer { context, .. }
            | EngineError::System { context, .. } => context,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Protocol { error, context } => {
                write!(f, "[PROTOCOL] {} ({})", error, context.operation)
            }
            EngineError::Hardware { error, context } => {
                write!(
                    f,
                    "[HARDWARE] {} (at {}:{})",
                    error,
                    context.file.unwrap_or("unknown"),
                    context.line.unwrap_or(0)
                )
            }
            EngineError::Configuration { component, reason, context } => {
                write!(f, "[CONFIG] Configuration error in {}: {} ({})", component, reason, context.operation)
            }
            EngineError::Sequencer { error, context } => {
                write!(f, "[SEQUENCER] {} ({})", error, context.operation)
            }
            EngineError::System { subsystem, reason, context } => {
                write!(f, "[SYSTEM] {} error: {} ({})", subsystem, reason, context.operation)
            }
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Protocol { error, .. } => Some(error),
            EngineError::Hardware { error, .. } => Some(error),
            EngineError::Sequencer { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ProtocolError> for EngineError {
    fn from(error: ProtocolError) -> Self {
        EngineError::Protocol {
            error,
            context: error_context!("protocol", "load"),
        }
    }
}

impl From<HalError> for EngineError {
    fn from(error: HalError) -> Self {
        EngineError::Hardware {
            error,
            context: error_context!("hal", "device_operation"),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(error: ConfigError) -> Self {
        EngineError::Configuration {
            component: "config".to_string(),
            reason: error.to_string(),
            context: error_context!("config", "load"),
        }
    }
}

impl From<SequencerError> for EngineError {
    fn from(error: SequencerError) -> Self {
        EngineError::Sequencer {
            error,
            context: error_context!("sequencer", "transition"),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error builder for convenient error construction
pub struct EngineErrorBuilder {
    component: String,
    operation: String,
}

impl EngineErrorBuilder {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn system(self, reason: &str) -> EngineError {
        let context = ErrorContext::new(&self.component, &self.operation);
        EngineError::System {
            subsystem: self.component,
            reason: reason.to_string(),
            context,
        }
    }
}

/// Convenience trait for error building
pub trait IntoEngineError<T> {
    fn engine_err(self, component: &str, operation: &str) -> EngineResult<T>;
}

impl<T, E> IntoEngineError<T> for Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn engine_err(self, component: &str, operation: &str) -> EngineResult<T> {
        self.map_err(|err| EngineErrorBuilder::new(component, operation).system(&err.to_string()))
    }
}
