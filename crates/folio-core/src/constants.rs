//! Shared defaults for the storage layer.

/// Leaf directories every order folder must contain.
pub const REQUIRED_SUBFOLDERS: [&str; 4] = ["Image", "QR", "nft_markers", "nft_cache"];

pub const DEFAULT_CHUNK_SIZE_MB: usize = 8;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CHUNK_MAX_ATTEMPTS: u32 = 1;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

/// Object name used to materialize a virtual directory in an object store.
pub const DIRECTORY_MARKER: &str = ".keep";
