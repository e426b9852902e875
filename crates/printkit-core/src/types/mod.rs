//! Type system utilities and aliases.
//!
//! ## Modules
//!
//! - [`aliases`]: Type aliases for `Arc<RwLock<T>>` and `Arc<RwLock<HashMap<K, V>>>`.

pub mod aliases;

pub use aliases::*;
