//! # Stride Storage
//!
//! Key-value persistence substrate for the Stride sync engine.
//!
//! The operation log never talks to a platform storage API directly. It is
//! handed a [`KvStore`], an **opaque record store** that knows nothing about
//! pending operations, dead letters or sync state.
//!
//! ## Design Principles
//!
//! - Stores map UTF-8 keys to opaque byte values
//! - `delete` is idempotent
//! - `flush` is the durability point: after it returns, every previous
//!   write survives process termination
//! - Must be `Send + Sync` so the log can be shared between tasks
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For tests; clones share the same data so a test can
//!   "restart" the log over the surviving store
//! - [`FileStore`] - Append-only journal with CRC-checked records and
//!   torn-tail recovery
//!
//! ## Example
//!
//! ```rust
//! use stride_storage::{InMemoryStore, KvStore};
//!
//! let mut store = InMemoryStore::new();
//! store.put("op/1", b"hello").unwrap();
//! store.flush().unwrap();
//! assert_eq!(store.get("op/1").unwrap().as_deref(), Some(&b"hello"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::{FileStore, FileStoreConfig, JournalReport};
pub use memory::InMemoryStore;
pub use record::{compute_crc32, JournalRecord, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use store::KvStore;
