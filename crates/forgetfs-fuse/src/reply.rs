//! Reply types for FUSE operations.
//!
//! Each FUSE operation produces one of these reply types. The reply is
//! consumed by the transport to send the appropriate kernel response.

use crate::types::{FileAttr, FuseConnInfo, FuseEntryParam};
use std::time::Duration;

/// Reply for operations that return an entry (lookup, mkdir).
#[derive(Debug, Clone)]
pub struct ReplyEntry {
    pub entry: FuseEntryParam,
}

/// Reply for getattr.
#[derive(Debug, Clone)]
pub struct ReplyAttr {
    pub attr: FileAttr,
    pub attr_timeout: Duration,
}

/// Reply for open/opendir.
#[derive(Debug, Clone, Default)]
pub struct ReplyOpen {
    /// File handle assigned by the filesystem.
    pub fh: u64,
    /// Flags back to the kernel (direct_io, keep_cache, etc.).
    pub flags: u32,
}

/// Reply for read operations.
#[derive(Debug)]
pub struct ReplyData {
    pub data: Vec<u8>,
}

/// Reply for write operations.
#[derive(Debug, Clone, Copy)]
pub struct ReplyWrite {
    /// Number of bytes written.
    pub written: u32,
}

/// Reply for create (returns both entry and open info).
#[derive(Debug, Clone)]
pub struct ReplyCreate {
    pub entry: FuseEntryParam,
    pub fh: u64,
    pub flags: u32,
}

/// Unified FUSE reply enum covering all operation result types.
///
/// Operations that only return an error code (forget, release, etc.)
/// produce `Empty` on success.
#[derive(Debug)]
pub enum FuseReply {
    Empty,
    /// Negotiated connection parameters (init).
    Init(FuseConnInfo),
    /// Entry-based replies (lookup, mkdir).
    Entry(ReplyEntry),
    /// Attribute reply (getattr).
    Attr(ReplyAttr),
    /// Open reply (open, opendir).
    Open(ReplyOpen),
    Data(ReplyData),
    Write(ReplyWrite),
    /// Create reply (entry + open).
    Create(ReplyCreate),
}

impl FuseReply {
    /// The entry carried by a lookup, mkdir or create reply.
    pub fn entry(&self) -> Option<&FuseEntryParam> {
        match self {
            FuseReply::Entry(reply) => Some(&reply.entry),
            FuseReply::Create(reply) => Some(&reply.entry),
            _ => None,
        }
    }
}

/// Result type for FUSE operations.
///
/// The error is an errno value (positive integer).
pub type FuseResult<T> = std::result::Result<T, i32>;
