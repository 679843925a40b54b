use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

/// Shared metrics collector interface
///
/// This is a trait object that allows applications to plug in their own
/// metrics implementations (Prometheus, StatsD, etc.)
pub trait MetricsCollector: Send + Sync {
    fn bytes_cached(&self, amount: usize);
    fn fragment_created(&self);
    fn blob_invalidated(&self);
    fn cache_hit_bytes(&self, amount: usize);
    fn backend_read_bytes(&self, amount: usize);
    fn blob_stored(&self);
}

/// No-op metrics collector (default)
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn bytes_cached(&self, _amount: usize) {}
    fn fragment_created(&self) {}
    fn blob_invalidated(&self) {}
    fn cache_hit_bytes(&self, _amount: usize) {}
    fn backend_read_bytes(&self, _amount: usize) {}
    fn blob_stored(&self) {}
}

lazy_static! {
    static ref BYTES_CACHED: IntCounter = register_int_counter!(
        "blobstore_cache_bytes_stored_total",
        "Bytes written into the fragment cache"
    )
    .unwrap();
    static ref FRAGMENTS_CREATED: IntCounter = register_int_counter!(
        "blobstore_cache_fragments_created_total",
        "Fragments allocated by the cache"
    )
    .unwrap();
    static ref BLOBS_INVALIDATED: IntCounter = register_int_counter!(
        "blobstore_cache_blobs_invalidated_total",
        "Blobs whose cached fragments were dropped"
    )
    .unwrap();
    static ref CACHE_HIT_BYTES: IntCounter = register_int_counter!(
        "blobstore_read_cache_hit_bytes_total",
        "Bytes served to readers from the cache"
    )
    .unwrap();
    static ref BACKEND_READ_BYTES: IntCounter = register_int_counter!(
        "blobstore_read_backend_bytes_total",
        "Bytes served to readers from the storage backend"
    )
    .unwrap();
    static ref BLOBS_STORED: IntCounter =
        register_int_counter!("blobstore_blobs_stored_total", "Blobs written to storage").unwrap();
}

/// Collector backed by the default prometheus registry.
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetrics;

impl MetricsCollector for PrometheusMetrics {
    fn bytes_cached(&self, amount: usize) {
        BYTES_CACHED.inc_by(amount as u64);
    }

    fn fragment_created(&self) {
        FRAGMENTS_CREATED.inc();
    }

    fn blob_invalidated(&self) {
        BLOBS_INVALIDATED.inc();
    }

    fn cache_hit_bytes(&self, amount: usize) {
        CACHE_HIT_BYTES.inc_by(amount as u64);
    }

    fn backend_read_bytes(&self, amount: usize) {
        BACKEND_READ_BYTES.inc_by(amount as u64);
    }

    fn blob_stored(&self) {
        BLOBS_STORED.inc();
    }
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn prometheus() -> Self {
        Self(Arc::new(PrometheusMetrics))
    }

    pub fn bytes_cached(&self, amount: usize) {
        self.0.bytes_cached(amount);
    }

    pub fn fragment_created(&self) {
        self.0.fragment_created();
    }

    pub fn blob_invalidated(&self) {
        self.0.blob_invalidated();
    }

    pub fn cache_hit_bytes(&self, amount: usize) {
        self.0.cache_hit_bytes(amount);
    }

    pub fn backend_read_bytes(&self, amount: usize) {
        self.0.backend_read_bytes(amount);
    }

    pub fn blob_stored(&self) {
        self.0.blob_stored();
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}

impl fmt::Debug for SharedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedMetrics")
    }
}
