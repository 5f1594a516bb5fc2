//! FUSE operations trait.
//!
//! Defines the `FuseOps` trait with the FUSE low-level operations the
//! dispatcher can route. Every default implementation answers the way the
//! kernel expects from a filesystem that does not support the operation.

use crate::reply::*;
use crate::types::*;

/// Trait defining the FUSE filesystem operations.
///
/// Each method corresponds to a FUSE low-level operation. Default
/// implementations return `ENOSYS` (function not implemented), except for
/// the lifecycle and close-style calls, which succeed.
///
/// # Error handling
///
/// Operations return `FuseResult<T>` where the error value is an errno
/// (positive integer, e.g., `libc::ENOENT`).
#[async_trait::async_trait]
pub trait FuseOps: Send + Sync + 'static {
    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Called when the filesystem is mounted.
    async fn init(&self, conn_info: &mut FuseConnInfo) -> FuseResult<()> {
        let _ = conn_info;
        Ok(())
    }

    /// Called when the filesystem is unmounted.
    async fn destroy(&self) {}

    // ── Name lookup ─────────────────────────────────────────────────────

    /// Look up a directory entry by name and return its attributes.
    ///
    /// A successful reply hands the kernel one lookup reference on the
    /// returned inode.
    async fn lookup(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
    ) -> FuseResult<ReplyEntry> {
        let _ = (ctx, parent, name);
        Err(libc::ENOSYS)
    }

    /// Forget about an inode, decrementing its lookup count by `nlookup`.
    ///
    /// The kernel never waits for a reply to this request.
    async fn forget(&self, ino: u64, nlookup: u64) {
        let _ = (ino, nlookup);
    }

    // ── Attribute operations ────────────────────────────────────────────

    async fn getattr(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: Option<u64>,
    ) -> FuseResult<ReplyAttr> {
        let _ = (ctx, ino, fh);
        Err(libc::ENOSYS)
    }

    // ── File creation ───────────────────────────────────────────────────

    async fn mkdir(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
        mode: u32,
    ) -> FuseResult<ReplyEntry> {
        let _ = (ctx, parent, name, mode);
        Err(libc::ENOSYS)
    }

    /// Atomically create and open a file.
    ///
    /// Like lookup, a successful reply carries one lookup reference.
    async fn create(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
        mode: u32,
        flags: i32,
    ) -> FuseResult<ReplyCreate> {
        let _ = (ctx, parent, name, mode, flags);
        Err(libc::ENOSYS)
    }

    // ── File I/O ────────────────────────────────────────────────────────

    /// Open a file.
    ///
    /// Returns a file handle and flags (direct_io, keep_cache).
    async fn open(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        flags: i32,
    ) -> FuseResult<ReplyOpen> {
        let _ = (ctx, ino, flags);
        Err(libc::ENOSYS)
    }

    async fn read(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let _ = (ctx, ino, fh, offset, size);
        Err(libc::ENOSYS)
    }

    async fn write(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        flags: i32,
    ) -> FuseResult<ReplyWrite> {
        let _ = (ctx, ino, fh, offset, data, flags);
        Err(libc::ENOSYS)
    }

    /// Flush any buffered data for an open file.
    ///
    /// Called on each `close()` of a file descriptor.
    async fn flush(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
    ) -> FuseResult<()> {
        let _ = (ctx, ino, fh);
        Ok(())
    }

    /// Release (close) an open file.
    async fn release(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        flags: i32,
    ) -> FuseResult<()> {
        let _ = (ctx, ino, fh, flags);
        Ok(())
    }

    // ── Directory I/O ───────────────────────────────────────────────────

    async fn opendir(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
    ) -> FuseResult<ReplyOpen> {
        let _ = (ctx, ino);
        Err(libc::ENOSYS)
    }

    async fn releasedir(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
    ) -> FuseResult<()> {
        let _ = (ctx, ino, fh);
        Ok(())
    }
}
