//! Synthesized stat records.
//!
//! Backends have no ownership or permission model, so everything except
//! size and modification time is a fixed sentinel. Records are built fresh
//! for every query.

use std::fs::Metadata;
use std::time::UNIX_EPOCH;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

pub const FILE_MODE: u32 = S_IFREG | 0o770;
pub const DIR_MODE: u32 = S_IFDIR | 0o770;

pub const OWNER_UID: u32 = 1000;
pub const OWNER_GID: u32 = 1000;
pub const OWNER_NAME: &str = "owner";
pub const GROUP_NAME: &str = "group";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoStat {
    pub size: u64,
    /// Epoch seconds, 0 when unknown.
    pub mtime: i64,
    pub nlink: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub dev: u64,
    pub ino: u64,
}

impl PseudoStat {
    pub fn file(size: u64, mtime: i64) -> Self {
        Self {
            size,
            mtime,
            nlink: 1,
            mode: FILE_MODE,
            uid: OWNER_UID,
            gid: OWNER_GID,
            dev: 0,
            ino: 0,
        }
    }

    pub fn directory() -> Self {
        Self {
            size: 0,
            mtime: 0,
            mode: DIR_MODE,
            ..Self::file(0, 0)
        }
    }

    /// Record for a path on a disk-backed store. Only a file's size and
    /// modification time come from disk; the rest stays sentinel.
    pub fn from_metadata(meta: &Metadata) -> Self {
        if meta.is_dir() {
            return Self::directory();
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::file(meta.len(), mtime)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// `ls -l` style permission string, e.g. `drwxrwx---`.
    pub fn permissions(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(if self.is_dir() { 'd' } else { '-' });
        for shift in [6, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}
