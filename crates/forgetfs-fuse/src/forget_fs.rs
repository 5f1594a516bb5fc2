//! The public face of the filesystem.

use std::sync::Arc;

use crate::config::ForgetFsConfig;
use crate::filesystem::ForgetFsImpl;
use crate::server::{connection, Connection, ConnectionHandle, FileSystemServer};

/// A filesystem whose sole contents are a file named "foo" and a directory
/// named "bar".
///
/// Any name may be created in any directory, but the new inode behaves as if
/// it had been unlinked immediately. Reads and writes are not supported.
///
/// Lookup counts are tracked for every inode. A count going negative, or an
/// id being used after its count drained to zero, aborts the process. After
/// unmounting, [`ForgetFs::check`] verifies that nothing was leaked.
///
/// Only request serving and the post-unmount check are exposed; the inode
/// table cannot be reached directly.
pub struct ForgetFs {
    fs: Arc<ForgetFsImpl>,
    server: FileSystemServer<ForgetFsImpl>,
}

impl ForgetFs {
    pub fn new(config: ForgetFsConfig) -> Self {
        let fs = Arc::new(ForgetFsImpl::new(config));
        let server = FileSystemServer::new(Arc::clone(&fs));
        Self { fs, server }
    }

    /// Open a connection sized from the configured queue depth.
    pub fn connection(&self) -> (ConnectionHandle, Connection) {
        connection(self.fs.config().request_queue_depth)
    }

    /// Serve requests from `connection` until it closes.
    pub async fn serve_ops(&self, connection: Connection) {
        self.server.serve_ops(connection).await
    }

    /// Panic if any inode still has an unexpected lookup count. For use after
    /// unmounting.
    pub fn check(&self) {
        self.fs.check()
    }
}

impl std::fmt::Debug for ForgetFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgetFs")
            .field("config", self.fs.config())
            .finish()
    }
}
