//! Request dispatch and the serving loop.
//!
//! A transport turns kernel messages into [`FuseRequest`]s and pushes them
//! through a [`ConnectionHandle`]. [`FileSystemServer::serve_ops`] drains the
//! matching [`Connection`], running each request in its own task against a
//! [`FuseOps`] implementation, and sends the reply back on a oneshot channel.
//! A panicking handler ends the whole loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::error::ServerError;
use crate::ops::FuseOps;
use crate::reply::*;
use crate::types::*;

/// One typed operation, as decoded by the transport.
#[derive(Debug, Clone)]
pub enum FuseRequest {
    Init { conn_info: FuseConnInfo },
    Destroy,
    Lookup { ctx: FuseRequestContext, parent: u64, name: String },
    Forget { ino: u64, nlookup: u64 },
    GetAttr { ctx: FuseRequestContext, ino: u64, fh: Option<u64> },
    MkDir { ctx: FuseRequestContext, parent: u64, name: String, mode: u32 },
    Create { ctx: FuseRequestContext, parent: u64, name: String, mode: u32, flags: i32 },
    Open { ctx: FuseRequestContext, ino: u64, flags: i32 },
    Read { ctx: FuseRequestContext, ino: u64, fh: u64, offset: i64, size: u32 },
    Write { ctx: FuseRequestContext, ino: u64, fh: u64, offset: i64, data: Vec<u8>, flags: i32 },
    Flush { ctx: FuseRequestContext, ino: u64, fh: u64 },
    Release { ctx: FuseRequestContext, ino: u64, fh: u64, flags: i32 },
    OpenDir { ctx: FuseRequestContext, ino: u64 },
    ReleaseDir { ctx: FuseRequestContext, ino: u64, fh: u64 },
}

impl FuseRequest {
    /// Operation name, for logging.
    pub fn opcode(&self) -> &'static str {
        match self {
            FuseRequest::Init { .. } => "init",
            FuseRequest::Destroy => "destroy",
            FuseRequest::Lookup { .. } => "lookup",
            FuseRequest::Forget { .. } => "forget",
            FuseRequest::GetAttr { .. } => "getattr",
            FuseRequest::MkDir { .. } => "mkdir",
            FuseRequest::Create { .. } => "create",
            FuseRequest::Open { .. } => "open",
            FuseRequest::Read { .. } => "read",
            FuseRequest::Write { .. } => "write",
            FuseRequest::Flush { .. } => "flush",
            FuseRequest::Release { .. } => "release",
            FuseRequest::OpenDir { .. } => "opendir",
            FuseRequest::ReleaseDir { .. } => "releasedir",
        }
    }
}

/// Route one request to the matching `FuseOps` method.
pub async fn dispatch<F>(fs: &F, request: FuseRequest) -> FuseResult<FuseReply>
where
    F: FuseOps + ?Sized,
{
    match request {
        FuseRequest::Init { mut conn_info } => {
            fs.init(&mut conn_info).await?;
            Ok(FuseReply::Init(conn_info))
        }
        FuseRequest::Destroy => {
            fs.destroy().await;
            Ok(FuseReply::Empty)
        }
        FuseRequest::Lookup { ctx, parent, name } => {
            fs.lookup(ctx, parent, &name).await.map(FuseReply::Entry)
        }
        FuseRequest::Forget { ino, nlookup } => {
            fs.forget(ino, nlookup).await;
            Ok(FuseReply::Empty)
        }
        FuseRequest::GetAttr { ctx, ino, fh } => fs.getattr(ctx, ino, fh).await.map(FuseReply::Attr),
        FuseRequest::MkDir { ctx, parent, name, mode } => {
            fs.mkdir(ctx, parent, &name, mode).await.map(FuseReply::Entry)
        }
        FuseRequest::Create { ctx, parent, name, mode, flags } => fs
            .create(ctx, parent, &name, mode, flags)
            .await
            .map(FuseReply::Create),
        FuseRequest::Open { ctx, ino, flags } => fs.open(ctx, ino, flags).await.map(FuseReply::Open),
        FuseRequest::Read { ctx, ino, fh, offset, size } => {
            fs.read(ctx, ino, fh, offset, size).await.map(FuseReply::Data)
        }
        FuseRequest::Write { ctx, ino, fh, offset, data, flags } => fs
            .write(ctx, ino, fh, offset, &data, flags)
            .await
            .map(FuseReply::Write),
        FuseRequest::Flush { ctx, ino, fh } => fs.flush(ctx, ino, fh).await.map(|()| FuseReply::Empty),
        FuseRequest::Release { ctx, ino, fh, flags } => {
            fs.release(ctx, ino, fh, flags).await.map(|()| FuseReply::Empty)
        }
        FuseRequest::OpenDir { ctx, ino } => fs.opendir(ctx, ino).await.map(FuseReply::Open),
        FuseRequest::ReleaseDir { ctx, ino, fh } => {
            fs.releasedir(ctx, ino, fh).await.map(|()| FuseReply::Empty)
        }
    }
}

// ── Connection ──────────────────────────────────────────────────────────────

struct PendingRequest {
    request: FuseRequest,
    reply: oneshot::Sender<FuseResult<FuseReply>>,
}

/// The serving side of a connection. Consumed by `serve_ops`.
pub struct Connection {
    rx: mpsc::Receiver<PendingRequest>,
}

/// The requesting side of a connection. Cloneable; the connection closes
/// once every handle is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<PendingRequest>,
}

/// Create a connection whose request queue holds at most `capacity` entries.
pub fn connection(capacity: usize) -> (ConnectionHandle, Connection) {
    let (tx, rx) = mpsc::channel(capacity);
    (ConnectionHandle { tx }, Connection { rx })
}

impl ConnectionHandle {
    /// Send `request` and wait for its reply.
    pub async fn call(&self, request: FuseRequest) -> Result<FuseResult<FuseReply>, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PendingRequest { request, reply })
            .await
            .map_err(|_| ServerError::Disconnected)?;
        rx.await.map_err(|_| ServerError::Disconnected)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// ── Server ──────────────────────────────────────────────────────────────────

/// Serves requests from a connection against a `FuseOps` implementation.
pub struct FileSystemServer<F: ?Sized> {
    fs: Arc<F>,
}

impl<F: FuseOps + ?Sized> FileSystemServer<F> {
    pub fn new(fs: Arc<F>) -> Self {
        Self { fs }
    }

    /// Serve until every `ConnectionHandle` is dropped and all in-flight
    /// requests have finished.
    ///
    /// Requests run concurrently. A request that panics (a protocol
    /// violation) stops intake before its requester sees the failure, so
    /// nothing sent afterwards is dispatched. The panic is re-raised here
    /// once the remaining in-flight requests have finished.
    pub async fn serve_ops(&self, mut connection: Connection) {
        let mut tasks = JoinSet::new();
        let (violated_tx, mut violated_rx) = watch::channel(false);
        let violated_tx = Arc::new(violated_tx);
        info!("serving filesystem requests");

        loop {
            tokio::select! {
                biased;
                _ = violated_rx.changed() => {
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::reap(joined);
                }
                pending = connection.rx.recv() => {
                    let Some(PendingRequest { request, reply }) = pending else {
                        break;
                    };
                    if *violated_rx.borrow() {
                        break;
                    }
                    let fs = Arc::clone(&self.fs);
                    let violated = Arc::clone(&violated_tx);
                    tasks.spawn(async move {
                        let opcode = request.opcode();
                        let dispatched = AssertUnwindSafe(dispatch(fs.as_ref(), request))
                            .catch_unwind()
                            .await;
                        match dispatched {
                            Ok(result) => {
                                if let Err(errno) = &result {
                                    debug!(opcode, errno, "request failed");
                                }
                                if reply.send(result).is_err() {
                                    debug!(opcode, "requester went away before the reply");
                                }
                            }
                            Err(panic) => {
                                // Intake must be closed before the requester is released.
                                violated.send_replace(true);
                                drop(reply);
                                std::panic::resume_unwind(panic);
                            }
                        }
                    });
                }
            }
        }

        // Anything still queued is dropped unanswered.
        connection.rx.close();
        while let Some(joined) = tasks.join_next().await {
            Self::reap(joined);
        }
        info!("connection closed, stopped serving");
    }

    fn reap(joined: Result<(), JoinError>) {
        if let Err(err) = joined {
            if err.is_panic() {
                error!("request handler panicked, aborting the serving loop");
                std::panic::resume_unwind(err.into_panic());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts lookups; everything else uses the trait defaults.
    #[derive(Default)]
    struct CountingFs {
        lookups: AtomicU64,
    }

    #[async_trait::async_trait]
    impl FuseOps for CountingFs {
        async fn lookup(
            &self,
            _ctx: FuseRequestContext,
            parent: u64,
            name: &str,
        ) -> FuseResult<ReplyEntry> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if name == "panic" {
                panic!("lookup of a poisoned name");
            }
            Ok(ReplyEntry {
                entry: FuseEntryParam::new(
                    FileAttr {
                        ino: parent + 1,
                        ..Default::default()
                    },
                    std::time::Duration::ZERO,
                    std::time::Duration::ZERO,
                ),
            })
        }
    }

    fn lookup(name: &str) -> FuseRequest {
        FuseRequest::Lookup {
            ctx: FuseRequestContext::default(),
            parent: FUSE_ROOT_ID,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_method() {
        let fs = CountingFs::default();
        let reply = dispatch(&fs, lookup("x")).await.unwrap();
        assert_eq!(reply.entry().map(|e| e.ino), Some(2));
        assert_eq!(fs.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unimplemented_is_enosys() {
        let fs = CountingFs::default();
        let request = FuseRequest::Read {
            ctx: FuseRequestContext::default(),
            ino: 2,
            fh: 0,
            offset: 0,
            size: 4096,
        };
        assert_eq!(dispatch(&fs, request).await.unwrap_err(), libc::ENOSYS);
    }

    #[tokio::test]
    async fn test_dispatch_init_returns_conn_info() {
        let fs = CountingFs::default();
        let request = FuseRequest::Init {
            conn_info: FuseConnInfo::default(),
        };
        match dispatch(&fs, request).await.unwrap() {
            FuseReply::Init(conn) => assert_eq!(conn.proto_major, 7),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forget_replies_empty() {
        let fs = CountingFs::default();
        let request = FuseRequest::Forget { ino: 2, nlookup: 1 };
        assert!(matches!(dispatch(&fs, request).await, Ok(FuseReply::Empty)));
    }

    #[tokio::test]
    async fn test_serve_ops_answers_and_stops_on_close() {
        let fs = Arc::new(CountingFs::default());
        let server = FileSystemServer::new(fs.clone());
        let (handle, conn) = connection(4);
        let serving = tokio::spawn(async move { server.serve_ops(conn).await });

        let mut calls = JoinSet::new();
        for i in 0..10 {
            let handle = handle.clone();
            calls.spawn(async move { handle.call(lookup(&format!("n{i}"))).await });
        }
        while let Some(result) = calls.join_next().await {
            assert!(result.unwrap().unwrap().is_ok());
        }

        drop(handle);
        serving.await.unwrap();
        assert_eq!(fs.lookups.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_serve_ops_reraises_handler_panic() {
        let server = FileSystemServer::new(Arc::new(CountingFs::default()));
        let (handle, conn) = connection(4);
        let serving = tokio::spawn(async move { server.serve_ops(conn).await });

        let result = handle.call(lookup("panic")).await;
        assert_eq!(result.unwrap_err(), ServerError::Disconnected);

        let joined = serving.await;
        assert!(joined.unwrap_err().is_panic());

        // The serving side is gone, so later calls fail fast.
        assert_eq!(
            handle.call(lookup("x")).await.unwrap_err(),
            ServerError::Disconnected
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_nothing_dispatched_after_handler_panic() {
        for _ in 0..50 {
            let fs = Arc::new(CountingFs::default());
            let server = FileSystemServer::new(fs.clone());
            let (handle, conn) = connection(16);
            let serving = tokio::spawn(async move { server.serve_ops(conn).await });

            assert_eq!(
                handle.call(lookup("panic")).await.unwrap_err(),
                ServerError::Disconnected
            );
            assert_eq!(
                handle.call(lookup("after")).await.unwrap_err(),
                ServerError::Disconnected
            );
            assert_eq!(fs.lookups.load(Ordering::SeqCst), 1);

            assert!(serving.await.unwrap_err().is_panic());
        }
    }
}
