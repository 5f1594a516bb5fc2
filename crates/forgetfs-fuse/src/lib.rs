//! forgetfs-fuse: a FUSE filesystem for exercising the lookup/forget protocol.
//!
//! The filesystem contents are trivial (a file `foo` and a directory `bar`
//! under the root, plus any number of created-then-unlinked children). What
//! it checks is the kernel's lookup counting: every inode tracks how many
//! references the kernel holds, and any breach of the protocol aborts.
//!
//! # Architecture
//!
//! - **[`types`]** - `InodeId`, the canned inode ids, and FUSE attribute types.
//! - **[`reply`]** - Reply types for each FUSE operation.
//! - **[`ops`]** - The `FuseOps` trait; default methods return `ENOSYS`.
//! - **[`error`]** - `ProtocolViolation` and the `fatal` channel.
//! - **[`invariant_mutex`]** - A mutex that checks invariants at every lock
//!   boundary.
//! - **[`inode`]** - `Inode` and its lookup-count state machine, and the
//!   `InodeTable`.
//! - **[`server`]** - Typed requests, `dispatch`, connections and
//!   `FileSystemServer::serve_ops`.
//! - **[`forget_fs`]** - `ForgetFs`, the facade exposing serving and the
//!   post-unmount check only.
//!
//! # Usage
//!
//! ```rust,no_run
//! use forgetfs_fuse::{ForgetFs, ForgetFsConfig};
//!
//! # async fn run() {
//! let fs = ForgetFs::new(ForgetFsConfig::default());
//! let (handle, conn) = fs.connection();
//! // Hand `handle` to the transport, then:
//! # drop(handle);
//! fs.serve_ops(conn).await;
//! fs.check();
//! # }
//! ```

pub mod config;
pub mod error;
mod filesystem;
pub mod forget_fs;
pub mod inode;
pub mod invariant_mutex;
pub mod ops;
pub mod reply;
pub mod server;
pub mod types;

// Re-export key types at the crate level for convenience.
pub use config::{ConfigError, ForgetFsConfig};
pub use error::{ProtocolViolation, ServerError};
pub use forget_fs::ForgetFs;
pub use ops::FuseOps;
pub use reply::{FuseReply, FuseResult};
pub use server::{ConnectionHandle, FuseRequest};
pub use types::{FuseRequestContext, InodeId};
