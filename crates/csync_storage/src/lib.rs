//! # csync storage
//!
//! Byte stores underneath the csync journal.
//!
//! A log backend is an **opaque, append-only byte store** with one extra
//! operation: replacing the whole content atomically. The journal appends
//! framed records during a run and rewrites itself as a new generation
//! when the run ends. Backends never interpret the bytes.
//!
//! ## Available Backends
//!
//! - [`MemoryLog`] - For tests and in-memory journals
//! - [`FileLog`] - For the persistent `csync_journal.db`
//!
//! ## Example
//!
//! ```rust
//! use csync_storage::{LogBackend, MemoryLog};
//!
//! let mut log = MemoryLog::new();
//! let offset = log.append(b"frame").unwrap();
//! assert_eq!(log.read_at(offset, 5).unwrap(), b"frame");
//!
//! log.replace(b"generation 2").unwrap();
//! assert_eq!(log.size().unwrap(), 12);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::LogBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileLog;
pub use memory::MemoryLog;
