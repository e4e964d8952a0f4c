//! Ingest endpoints.
//!
//! Both transports run the same pipeline: decode → validate → admission →
//! attach tenant → cost per span → duration fill → stats propagation →
//! bulk persist → usage recording and experiment fan-out.

pub mod error;
pub mod grpc;
pub mod handlers;

pub use error::{IngestError, OtlpErrorBody};
pub use handlers::{export_traces, run_pipeline, run_pipeline_detached};
