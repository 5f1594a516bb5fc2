//! FUSE-specific types that mirror the FUSE kernel protocol structures.
//!
//! These types abstract away the raw FUSE protocol so the filesystem can be
//! driven by any transport that speaks typed requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ── Inode identifiers ───────────────────────────────────────────────────────

/// An inode identifier as exchanged with the kernel.
///
/// Totally ordered; ids are minted in increasing order and never reused.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct InodeId(pub u64);

impl InodeId {
    /// Returns the id that follows this one in minting order, or `None` at
    /// the end of the id space.
    #[inline]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl std::ops::Deref for InodeId {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl fmt::Debug for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InodeId({})", self.0)
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InodeId {
    #[inline]
    fn from(ino: u64) -> Self {
        Self(ino)
    }
}

impl From<InodeId> for u64 {
    #[inline]
    fn from(id: InodeId) -> Self {
        id.0
    }
}

/// The FUSE root inode number (always 1 in the kernel protocol).
pub const FUSE_ROOT_ID: u64 = 1;

/// The root directory.
pub const ROOT_INODE_ID: InodeId = InodeId(FUSE_ROOT_ID);
/// The canned regular file, bound as `foo` under the root.
pub const FOO_INODE_ID: InodeId = InodeId(FUSE_ROOT_ID + 1);
/// The canned directory, bound as `bar` under the root.
pub const BAR_INODE_ID: InodeId = InodeId(FUSE_ROOT_ID + 2);
/// First id handed out by create-style operations.
pub const FIRST_MINTED_INODE_ID: InodeId = InodeId(FUSE_ROOT_ID + 3);

/// Name of the canned file under the root.
pub const FOO_NAME: &str = "foo";
/// Name of the canned directory under the root.
pub const BAR_NAME: &str = "bar";

// ── File type bits (matching libc S_IF* constants) ──────────────────────────

/// Regular file.
pub const S_IFREG: u32 = libc::S_IFREG as u32;
/// Directory.
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
/// File type mask.
pub const S_IFMT: u32 = libc::S_IFMT as u32;

/// Permission bits every inode in this filesystem carries.
pub const DEFAULT_PERM: u32 = 0o777;

// ── Inode attributes ────────────────────────────────────────────────────────

/// The fixed attributes an inode is created with.
///
/// Size and timestamps are not modelled; they are reported as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeAttributes {
    /// Number of hard links.
    pub nlink: u32,
    /// File mode (type + permission bits).
    pub mode: u32,
}

impl InodeAttributes {
    pub fn directory(nlink: u32) -> Self {
        Self {
            nlink,
            mode: S_IFDIR | DEFAULT_PERM,
        }
    }

    pub fn regular(nlink: u32) -> Self {
        Self {
            nlink,
            mode: S_IFREG | DEFAULT_PERM,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Expand into the full kernel attribute struct for inode `ino`.
    pub fn to_file_attr(&self, ino: InodeId) -> FileAttr {
        FileAttr {
            ino: ino.0,
            mode: self.mode,
            nlink: self.nlink,
            ..Default::default()
        }
    }
}

// ── File attribute struct ───────────────────────────────────────────────────

/// File attributes returned by getattr/lookup operations.
///
/// Mirrors the kernel `struct stat` fields that FUSE cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttr {
    /// Inode number.
    pub ino: u64,
    /// File size in bytes.
    pub size: u64,
    /// Number of 512-byte blocks allocated.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// File mode (type + permission bits).
    pub mode: u32,
    /// Number of hard links.
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Default for FileAttr {
    fn default() -> Self {
        Self {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 0,
        }
    }
}

// ── FUSE entry param ────────────────────────────────────────────────────────

/// Entry returned by lookup and create operations.
///
/// Mirrors `struct fuse_entry_param` from the FUSE protocol.
#[derive(Debug, Clone)]
pub struct FuseEntryParam {
    /// Inode number of the entry.
    pub ino: u64,
    /// Generation number for the entry (always 0 here; ids are never reused).
    pub generation: u64,
    pub attr: FileAttr,
    /// Attribute cache validity duration.
    pub attr_timeout: Duration,
    /// Entry (name lookup) cache validity duration.
    pub entry_timeout: Duration,
}

impl FuseEntryParam {
    pub fn new(attr: FileAttr, attr_timeout: Duration, entry_timeout: Duration) -> Self {
        Self {
            ino: attr.ino,
            generation: 0,
            attr,
            attr_timeout,
            entry_timeout,
        }
    }
}

// ── Request context ─────────────────────────────────────────────────────────

/// Context information about the caller making a FUSE request.
///
/// Mirrors `fuse_req_ctx` from the FUSE kernel protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuseRequestContext {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

// ── Connection info ─────────────────────────────────────────────────────────

/// FUSE connection capabilities and parameters, set during init.
///
/// Mirrors `struct fuse_conn_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuseConnInfo {
    pub proto_major: u32,
    pub proto_minor: u32,
    pub max_readahead: u32,
    pub max_read: u32,
    pub max_write: u32,
    pub max_background: u32,
    /// Time granularity in nanoseconds.
    pub time_gran: u32,
    /// Capabilities of the kernel FUSE module.
    pub capable: u32,
    /// Capabilities requested by the filesystem.
    pub want: u32,
}

impl Default for FuseConnInfo {
    fn default() -> Self {
        Self {
            proto_major: 7,
            proto_minor: 0,
            max_readahead: 0,
            max_read: 0,
            max_write: 0,
            max_background: 0,
            time_gran: 1_000_000_000, // 1 second
            capable: 0,
            want: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_ids_are_consecutive_from_root() {
        assert_eq!(*ROOT_INODE_ID, FUSE_ROOT_ID);
        assert_eq!(ROOT_INODE_ID.next(), Some(FOO_INODE_ID));
        assert_eq!(FOO_INODE_ID.next(), Some(BAR_INODE_ID));
        assert_eq!(BAR_INODE_ID.next(), Some(FIRST_MINTED_INODE_ID));
    }

    #[test]
    fn test_next_at_id_space_end() {
        assert_eq!(InodeId(u64::MAX).next(), None);
    }

    #[test]
    fn test_inode_id_formatting() {
        let id = InodeId(12345);
        assert_eq!(format!("{:?}", id), "InodeId(12345)");
        assert_eq!(format!("{}", id), "12345");
        let raw: u64 = id.into();
        assert_eq!(raw, 12345);
    }

    #[test]
    fn test_inode_id_serde_transparent() {
        let json = serde_json::to_string(&InodeId(999)).unwrap();
        assert_eq!(json, "999");
        let parsed: InodeId = serde_json::from_str("999").unwrap();
        assert_eq!(parsed, InodeId(999));
    }

    #[test]
    fn test_directory_attributes() {
        let attrs = InodeAttributes::directory(1);
        assert!(attrs.is_directory());
        assert_eq!(attrs.mode & 0o7777, 0o777);
        assert_eq!(attrs.nlink, 1);
    }

    #[test]
    fn test_regular_attributes() {
        let attrs = InodeAttributes::regular(0);
        assert!(!attrs.is_directory());
        assert_eq!(attrs.mode & S_IFMT, S_IFREG);
        assert_eq!(attrs.mode & 0o7777, 0o777);
    }

    #[test]
    fn test_to_file_attr_leaves_size_and_times_zero() {
        let attr = InodeAttributes::regular(1).to_file_attr(FOO_INODE_ID);
        assert_eq!(attr.ino, 2);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.mtime, UNIX_EPOCH);
    }

    #[test]
    fn test_entry_param_takes_ino_from_attr() {
        let attr = InodeAttributes::directory(1).to_file_attr(BAR_INODE_ID);
        let entry = FuseEntryParam::new(attr, Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(entry.ino, 3);
        assert_eq!(entry.generation, 0);
        assert_eq!(entry.entry_timeout, Duration::from_secs(2));
    }
}
