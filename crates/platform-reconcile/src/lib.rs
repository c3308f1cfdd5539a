//! # Platform Reconcile
//!
//! This crate reconciles declarative Project and RoleBinding manifests
//! against the Relay platform API. It runs as an automation step in
//! deployment pipelines and produces an auditable record of what was
//! created, updated, skipped or rejected.
//!
//! ## Overview
//!
//! The platform-reconcile crate handles:
//! - **Parsing**: Multi-document YAML into typed, versioned objects
//! - **Validation**: Structural, referential and policy checks
//! - **Identity resolution**: Email to platform user ID, cached per run
//! - **Retries**: Exponential backoff with jitter and cancellation
//! - **Application**: Create and update calls through a retrying client
//! - **Reporting**: A serializable [`ProcessResult`] per run
//!
//! ## Pipeline
//!
//! ```text
//! SourceFile ─→ parser ─→ ParsedObject ─→ Validator ─→ Processor ─→ ProcessResult
//!                                            │              │
//!                                   IdentityResolver        │
//!                                            └── PlatformClient (retry) ─→ PlatformApi
//! ```
//!
//! Projects are applied before role bindings, each in input order.
//! Per-object failures are recorded and the batch continues; cancelling the
//! run's [`CancellationToken`](tokio_util::sync::CancellationToken) stops it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use platform_reconcile::{Processor, ReconcileConfig, SourceFile};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn reconcile() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReconcileConfig::from_env();
//!     let processor = Processor::from_config(&config, CancellationToken::new())?;
//!
//!     let files = vec![SourceFile::new(
//!         "projects/docs.yaml",
//!         std::fs::read("projects/docs.yaml")?,
//!     )];
//!     let result = processor.process_files(&files).await;
//!
//!     println!("{}", result.to_json()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `memory` (default): in-memory [`api::MemoryPlatformApi`] for tests and
//!   local dry runs

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod parser;
pub mod processor;
pub mod resolver;
pub mod result;
pub mod retry;
pub mod validator;

// Re-export main types for convenience
pub use api::{ApiError, ApiResult, HttpPlatformApi, PlatformApi};
#[cfg(feature = "memory")]
pub use api::{ApiOperation, MemoryPlatformApi};
pub use client::{ClientError, ClientPolicies, ClientResult, PlatformClient, RemoteClient};
pub use config::{ConfigError, ReconcileConfig, ServiceEndpoint};
pub use error::{ErrorKind, ReconcileError, ReconcileResult};
pub use parser::{
    parse_file, parse_files, DomainObject, InvalidObject, ParseOutcome, ParsedObject, SourceFile,
};
pub use processor::{Processor, ProcessorOptions};
pub use resolver::IdentityResolver;
pub use result::{
    ApplyAction, ProcessError, ProcessResult, ProcessSummary, ProjectOutcome, RoleBindingOutcome,
};
pub use retry::{execute, Classify, RetryError, RetryPolicy, RetryResult};
pub use validator::{
    RoleBindingValidation, UserValidation, ValidationIssue, Validator, ValidatorOptions,
};
