//! Tracing and OpenTelemetry integration for Sluice.
//!
//! Provides subscriber initialisation with optional OTLP export and span
//! helpers for triggers, stage and step lifecycle callbacks, and queue passes.

pub mod spans;
pub mod tracer;

pub use spans::{execution_span, queue_span, stage_span, step_span, trigger_span};
pub use tracer::{
    LogFormat, OtlpConfig, Protocol, TracerError, TracingConfig, init_tracer, shutdown_tracer,
};
