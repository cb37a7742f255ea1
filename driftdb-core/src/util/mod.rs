//! Shared plumbing: crash-safe file helpers, the fatal error signal, and
//! the per-root advisory lock.

mod fatal;
mod files;
mod lock;

pub use fatal::{FatalCallback, FatalErrorHandler};
pub use files::{
    atomic_rename, atomic_write, check_file, ensure_dir, remove_dir_if_exists, remove_if_exists,
    swap_path, sync_parent_dir, SWAP_EXTENSION,
};
pub use lock::LockFile;
