//! Content-addressed OCI packaging engine for Unikraft unikernels.
//!
//! Builds, stores, pushes, pulls, and resolves unikernel images as
//! OCI artifacts. See `SPEC_FULL.md` for the full module map.

pub mod builders;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod oci;
pub mod packager;
pub mod platform;
pub mod reference;
pub mod resolver;
pub mod store;
pub mod transport;

pub use digest::Digest;
pub use error::{OciPkgError, Result};
pub use reference::Reference;
