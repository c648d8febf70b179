//! Ditherfront Core - Reactive Parameter-to-Pipeline Compiler
//!
//! # The Rules (Non-Negotiable)
//! 1. The Store Owns Every Value
//! 2. Out-Of-Range Input Clamps, Never Fails
//! 3. Compilation Is Pure
//! 4. Stage Order Is Load-Bearing
//! 5. Both Preprocessing Passes Are Identical
//! 6. One Tool Invocation At A Time

pub mod algorithm;
pub mod params;
pub mod hashing;
pub mod pipeline;
pub mod executor;
pub mod session;

pub use algorithm::{DitherAlgorithm, UnknownAlgorithm};
pub use params::{Applied, Field, FieldValue, ParameterSet, ParameterStore, StoreError};
pub use hashing::{canonical_json, fingerprint, sha256_hex};
pub use pipeline::{CompileRequest, CompiledInvocation, PipelineCompiler, PipelineError, Stage};
pub use executor::{ExecutionError, ExecutionResult, Executor, ProcessRunner, Termination, ToolRunner};
pub use session::{CycleReport, DisplaySurface, Event, EventParseError, Pane, Session, SessionError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tool name resolved against the working directory when none is configured.
pub const DEFAULT_TOOL: &str = "dither";
