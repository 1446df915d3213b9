//! AWS-backed implementations of the zipdrop engine seams.
//!
//! - [`S3ObjectStore`] implements [`zipdrop_core::store::ObjectStore`] with
//!   `aws-sdk-s3`. Large entries are uploaded through [`EntryBody`], a sized
//!   streaming body, so they are never buffered whole.
//! - [`StsCredentialIssuer`] implements
//!   [`zipdrop_core::credentials::CredentialIssuer`] with `sts:AssumeRole`.
//! - [`S3StoreFactory`] turns assumed credentials into target stores.

pub mod body;
pub mod factory;
pub mod s3;
pub mod sts;

pub use body::EntryBody;
pub use factory::{S3StoreFactory, credential_issuer, load_sdk_config, source_store};
pub use s3::S3ObjectStore;
pub use sts::StsCredentialIssuer;
