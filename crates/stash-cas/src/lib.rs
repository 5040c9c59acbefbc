//! Local content-addressable storage for stash.
//!
//! Blobs are keyed by their [`Digest`] and stored one file per blob in 256
//! shard directories:
//!
//! ```text
//! {root}/
//! ├── 00/ .. ff/
//! │   └── <full hex hash>   # blob content
//! └── tmp/                  # staging area for in-progress writes
//! ```
//!
//! # Guarantees
//!
//! - Every read and stat re-verifies the file size against the digest, so a
//!   truncated or partially written blob surfaces as missing, never as data.
//! - Concurrent writes of the same digest are coalesced into one physical
//!   write ([`Singleflight`]); writes of different digests run in parallel.
//! - The empty blob always exists once the store is open.
//!
//! [`Digest`]: stash_types::Digest

pub mod config;
pub mod error;
pub mod flight;
pub mod store;

pub use config::CasConfig;
pub use error::{CasError, CasResult, MissingBlobsError};
pub use flight::Singleflight;
pub use store::{BlobReader, CasStats, LocalCas};
