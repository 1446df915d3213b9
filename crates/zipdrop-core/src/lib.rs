//! Extraction and replication engine for zipdrop.
//!
//! Given a ZIP archive in one bucket and a target bucket owned by (possibly)
//! another account, the engine assumes a role in the target account, streams
//! the archive entry by entry into individual objects, and optionally removes
//! destination objects the archive no longer contains.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (per invocation)
//!        |
//!        +--> CredentialResolver --> CredentialIssuer (STS)
//!        |
//!        +--> ArchiveReader ------> ObjectStore (source, ranged reads)
//!        |
//!        +--> ObjectReplicator ---> ObjectStore (target, via StoreFactory)
//!        |
//!        +--> DestinationReconciler
//! ```
//!
//! The storage and identity services sit behind the [`store::ObjectStore`],
//! [`store::StoreFactory`] and [`credentials::CredentialIssuer`] traits. The
//! [`memory`] module provides in-process implementations.

pub mod archive;
pub mod config;
pub mod credentials;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod outcome;
pub mod reconciler;
pub mod replicator;
pub mod store;
pub mod types;
pub mod utils;

pub use config::ZipdropConfig;
pub use error::{ArchiveError, AuthorizationError, CredentialError, InvocationError, StoreError};
pub use orchestrator::Orchestrator;
pub use outcome::{ErrorKind, ErrorRecord, InvocationReport, JobOutcome, JobStatus, ReportStatus};
pub use types::{AccountId, CallerIdentity, InvocationRequest, ReplicationJob};
