//! # hotreload-package
//!
//! Deployment packages: build, digest, decode, materialize.
//!
//! Call [`builder::build_and_stage`] on the sending side; the receiving side
//! runs [`digest::verify`] and [`archive::decode`] before anything touches the
//! managed tree, then [`writer::materialize`] at the point of no return.

pub mod archive;
pub mod builder;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod writer;

pub use archive::{decode, decode_bounded, DeploymentPackage};
pub use builder::{build, build_and_stage, stage_bytes, BuiltPackage, InclusionPolicy};
pub use digest::{compute as compute_digest, verify as verify_digest};
pub use error::PackageError;
pub use manifest::{check_manifest, ManifestChange};
pub use writer::{materialize, MaterializeReport, WriteResult};
