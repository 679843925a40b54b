//! # Blobstore
//!
//! Blob storage with an in-memory byte range cache.
//!
//! - **Fragment cache**: the address space of each blob is tiled into fixed-size fragments
//!   that remember which byte ranges are known
//! - **Range merging**: overlapping and adjacent writes are folded into disjoint parts
//! - **Stitched reads**: a read stream serves cached runs and fetches only the gaps from storage
//! - **Pluggable backends**: in-memory, or persistent on top of fjall
//!
//! ## Example
//!
//! ```no_run
//! use blobstore::{Blobstore, FragmentCache, MemoryBackend, SharedMetrics};
//! use std::io::Read;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Blobstore::new(
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(FragmentCache::new(1024)?),
//!     SharedMetrics::default(),
//! );
//!
//! let id = store.store_blob(&mut &b"hello blob"[..], None, Some("greeting"))?;
//! store.warm(id, 0, 5)?;
//!
//! let mut content = String::new();
//! store.read_blob(id, 6)?.read_to_string(&mut content)?;
//! assert_eq!(content, "blob");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod blobstore;
pub mod cache;
pub mod check;
pub mod config;
pub mod error;
pub mod inspect;
pub mod metrics;
pub mod read_stream;
pub mod retrieve;

/// Numeric identity of a stored blob.
pub type BlobId = u64;

pub use backend::{BlobInfo, Durability, FjallBackend, MemoryBackend, StorageBackend};
pub use blobstore::{Blobstore, BLOB_DESCRIPTION_MAX_LENGTH};
pub use cache::{CacheError, CacheKey, CachedBlobPart, FragmentCache, Range, RangeRelation};
pub use config::BlobstoreConfig;
pub use error::BlobstoreError;
pub use metrics::{MetricsCollector, NoOpMetrics, PrometheusMetrics, SharedMetrics};
pub use read_stream::BlobReadStream;
