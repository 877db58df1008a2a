//! POSIX-like filesystem view over a storage client.

pub mod error;
pub mod file;
pub mod fs;
pub mod key;
pub mod patch;
pub mod path;
pub mod stat;

pub use error::{VfsError, VfsResult};
pub use file::{OpenMode, StorageFile};
pub use fs::StorageFs;
pub use stat::PseudoStat;
