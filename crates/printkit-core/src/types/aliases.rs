//! Type aliases for commonly used shared-state types.
//!
//! Engines, the façade and the state monitor share a handful of values
//! across threads. The aliases give those nested types a name.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use printkit_core::types::*;
//!
//! // Instead of: Arc<RwLock<PrinterState>>
//! let state: ThreadSafeRw<PrinterState> = thread_safe_rw(PrinterState::None);
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A thread-safe reader-writer lock wrapper for read-heavy workloads.
///
/// Snapshots are read far more often than the monitor writes them.
pub type ThreadSafeRw<T> = Arc<RwLock<T>>;

/// A thread-safe reader-writer hash map.
pub type ThreadSafeRwMap<K, V> = Arc<RwLock<HashMap<K, V>>>;

/// Create a new `ThreadSafeRw<T>` value.
#[inline]
pub fn thread_safe_rw<T>(value: T) -> ThreadSafeRw<T> {
    Arc::new(RwLock::new(value))
}

/// Create a new empty `ThreadSafeRwMap<K, V>`.
#[inline]
pub fn thread_safe_rw_map<K, V>() -> ThreadSafeRwMap<K, V> {
    Arc::new(RwLock::new(HashMap::new()))
}
