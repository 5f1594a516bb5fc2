use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use forgetfs_fuse::types::{FuseConnInfo, FUSE_ROOT_ID, S_IFREG};
use forgetfs_fuse::{
    ConnectionHandle, ForgetFs, ForgetFsConfig, FuseReply, FuseRequest, FuseRequestContext,
};
use forgetfs_logging::LogConfig;

/// forgetfs lookup/forget exerciser
///
/// Serves a forgetfs instance, drives concurrent lookup, create and forget
/// traffic through it, returns every reference it took, then runs the
/// post-unmount lookup count check.
#[derive(Parser, Debug)]
#[command(name = "forgetfs-exercise", version, about)]
struct Args {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override whether forgets are delivered reliably on this host
    #[arg(long)]
    forget_delivery_reliable: Option<bool>,

    /// Override the number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override the number of rounds each worker runs
    #[arg(long)]
    iterations: Option<usize>,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExerciseConfig {
    #[serde(default)]
    fs: ForgetFsConfig,

    #[serde(default)]
    log: LogConfig,

    #[serde(default)]
    workload: WorkloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkloadConfig {
    /// Number of concurrent request streams.
    #[serde(default = "default_workers")]
    workers: usize,

    /// Rounds of traffic per worker.
    #[serde(default = "default_iterations")]
    iterations: usize,
}

fn default_workers() -> usize {
    8
}

fn default_iterations() -> usize {
    100
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            iterations: default_iterations(),
        }
    }
}

impl ExerciseConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    fn apply(&mut self, args: &Args) {
        if let Some(reliable) = args.forget_delivery_reliable {
            self.fs.forget_delivery_reliable = reliable;
        }
        if let Some(workers) = args.workers {
            self.workload.workers = workers;
        }
        if let Some(iterations) = args.iterations {
            self.workload.iterations = iterations;
        }
    }
}

/// Request totals, for the final report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Stats {
    lookups: u64,
    created: u64,
    forgets: u64,
    enoent: u64,
}

impl std::ops::AddAssign for Stats {
    fn add_assign(&mut self, other: Self) {
        self.lookups += other.lookups;
        self.created += other.created;
        self.forgets += other.forgets;
        self.enoent += other.enoent;
    }
}

fn ctx(worker: usize) -> FuseRequestContext {
    FuseRequestContext {
        uid: 0,
        gid: 0,
        pid: std::process::id().wrapping_add(worker as u32),
    }
}

async fn call_ok(handle: &ConnectionHandle, request: FuseRequest) -> anyhow::Result<FuseReply> {
    let opcode = request.opcode();
    handle
        .call(request)
        .await?
        .map_err(|errno| anyhow!("{opcode} failed with errno {errno}"))
}

fn entry_ino(reply: &FuseReply) -> anyhow::Result<u64> {
    reply
        .entry()
        .map(|entry| entry.ino)
        .ok_or_else(|| anyhow!("expected an entry reply, got {reply:?}"))
}

async fn lookup(handle: &ConnectionHandle, worker: usize, name: &str) -> anyhow::Result<u64> {
    let reply = call_ok(
        handle,
        FuseRequest::Lookup {
            ctx: ctx(worker),
            parent: FUSE_ROOT_ID,
            name: name.to_string(),
        },
    )
    .await?;
    entry_ino(&reply)
}

async fn forget(handle: &ConnectionHandle, ino: u64, nlookup: u64) -> anyhow::Result<()> {
    call_ok(handle, FuseRequest::Forget { ino, nlookup }).await?;
    Ok(())
}

/// One worker's traffic. Every reference taken is forgotten before returning.
async fn run_worker(
    handle: ConnectionHandle,
    worker: usize,
    iterations: usize,
) -> anyhow::Result<Stats> {
    let mut stats = Stats::default();

    for round in 0..iterations {
        let foo = lookup(&handle, worker, "foo").await?;
        call_ok(
            &handle,
            FuseRequest::GetAttr {
                ctx: ctx(worker),
                ino: foo,
                fh: None,
            },
        )
        .await?;
        call_ok(
            &handle,
            FuseRequest::Open {
                ctx: ctx(worker),
                ino: foo,
                flags: libc::O_RDWR,
            },
        )
        .await?;
        call_ok(
            &handle,
            FuseRequest::Release {
                ctx: ctx(worker),
                ino: foo,
                fh: 0,
                flags: libc::O_RDWR,
            },
        )
        .await?;

        let bar = lookup(&handle, worker, "bar").await?;
        call_ok(&handle, FuseRequest::OpenDir { ctx: ctx(worker), ino: bar }).await?;
        call_ok(
            &handle,
            FuseRequest::ReleaseDir {
                ctx: ctx(worker),
                ino: bar,
                fh: 0,
            },
        )
        .await?;
        stats.lookups += 2;

        let file = call_ok(
            &handle,
            FuseRequest::Create {
                ctx: ctx(worker),
                parent: FUSE_ROOT_ID,
                name: format!("file-{worker}-{round}"),
                mode: S_IFREG | 0o644,
                flags: libc::O_CREAT | libc::O_RDWR,
            },
        )
        .await?;
        let file = entry_ino(&file)?;
        let dir = call_ok(
            &handle,
            FuseRequest::MkDir {
                ctx: ctx(worker),
                parent: bar,
                name: format!("dir-{worker}-{round}"),
                mode: 0o755,
            },
        )
        .await?;
        let dir = entry_ino(&dir)?;
        stats.created += 2;

        // Created names never resolve.
        let probe = handle
            .call(FuseRequest::Lookup {
                ctx: ctx(worker),
                parent: FUSE_ROOT_ID,
                name: format!("file-{worker}-{round}"),
            })
            .await?;
        match probe {
            Err(errno) if errno == libc::ENOENT => stats.enoent += 1,
            other => return Err(anyhow!("probe lookup returned {other:?}, expected ENOENT")),
        }

        for ino in [dir, file, bar, foo] {
            forget(&handle, ino, 1).await?;
        }
        stats.forgets += 4;
    }

    Ok(stats)
}

/// Drive the whole workload through `handle`.
///
/// The canned inodes are pinned by one lookup each for the duration, so no
/// worker's forget can drain them while another worker is about to look
/// them up again.
async fn run_workload(handle: &ConnectionHandle, workload: &WorkloadConfig) -> anyhow::Result<Stats> {
    call_ok(
        handle,
        FuseRequest::Init {
            conn_info: FuseConnInfo::default(),
        },
    )
    .await?;

    let foo = lookup(handle, 0, "foo").await?;
    let bar = lookup(handle, 0, "bar").await?;
    let mut stats = Stats {
        lookups: 2,
        ..Default::default()
    };

    let mut workers = JoinSet::new();
    for worker in 0..workload.workers {
        workers.spawn(run_worker(handle.clone(), worker + 1, workload.iterations));
    }
    while let Some(joined) = workers.join_next().await {
        stats += joined.context("worker task failed")??;
    }

    forget(handle, foo, 1).await?;
    forget(handle, bar, 1).await?;
    stats.forgets += 2;

    call_ok(handle, FuseRequest::Destroy).await?;
    Ok(stats)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_default_config {
        print!("{}", toml::to_string_pretty(&ExerciseConfig::default())?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ExerciseConfig::load(path)?,
        None => ExerciseConfig::default(),
    };
    config.apply(&args);
    config.fs.validate()?;

    let _log_guard = forgetfs_logging::init_logging(&config.log)?;

    tracing::info!(
        config = ?args.config,
        forget_delivery_reliable = config.fs.forget_delivery_reliable,
        workers = config.workload.workers,
        iterations = config.workload.iterations,
        "Starting forgetfs exerciser"
    );

    let fs = Arc::new(ForgetFs::new(config.fs.clone()));
    let (handle, conn) = fs.connection();
    let serving = {
        let fs = Arc::clone(&fs);
        tokio::spawn(async move { fs.serve_ops(conn).await })
    };

    let stats = run_workload(&handle, &config.workload).await;

    // Closing the last handle ends serving; this stands in for unmount.
    drop(handle);
    match serving.await {
        Ok(()) => {}
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => return Err(err).context("filesystem server task failed"),
    }
    let stats = stats?;

    fs.check();
    tracing::info!(
        lookups = stats.lookups,
        created = stats.created,
        forgets = stats.forgets,
        enoent = stats.enoent,
        "lookup counts verified"
    );

    Ok(())
}
