//! Local endpoint allocation
//!
//! Every forward listens on its own local endpoint. Unix socket names are
//! built from the remote path plus an identifier that must never repeat
//! within the process, so forwarding the same remote socket twice never
//! hits "address already in use".

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Longest slice of the remote path kept in a local socket name.
///
/// Unix socket paths are limited to ~104-108 bytes, so only the tail of the
/// remote path is kept.
const MAX_NAME_HINT: usize = 16;

/// Source of process-unique identifiers for local endpoints
pub trait EndpointAllocator: Send + Sync {
    /// Next identifier; never returns the same value twice
    fn next_id(&self) -> String;

    /// Local socket path for forwarding `remote_path`
    fn socket_path(&self, dir: &Path, remote_path: &str) -> PathBuf {
        let hint = name_hint(remote_path);
        dir.join(format!("ep-{}-{}.sock", hint, self.next_id()))
    }
}

/// Hex digits of a UUID kept in an identifier
const UUID_ID_LEN: usize = 16;

/// Random identifiers, the first 64 bits of a UUID v4 in hex
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidAllocator;

impl EndpointAllocator for UuidAllocator {
    fn next_id(&self) -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(UUID_ID_LEN);
        id
    }
}

/// Monotonic counter, predictable names for tests
#[derive(Debug, Default)]
pub struct SequentialAllocator {
    next: AtomicU64,
}

impl SequentialAllocator {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }
}

impl EndpointAllocator for SequentialAllocator {
    fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

/// Filesystem-safe tail of the remote path
fn name_hint(remote_path: &str) -> String {
    let sanitized: String = remote_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    let start = trimmed.len().saturating_sub(MAX_NAME_HINT);
    trimmed[start..].trim_start_matches('-').to_string()
}
