//! Observability: structured logging and tracing spans

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{supervisor_span, transport_span};
