//! The filesystem operation handlers.
//!
//! `ForgetFsImpl` implements `FuseOps` on top of a single `InodeTable`
//! guarded by an `InvariantMutex`. Every handler holds the lock for its
//! whole duration and never awaits while holding it.

use tracing::{debug, info};

use crate::config::ForgetFsConfig;
use crate::error::fatal;
use crate::inode::InodeTable;
use crate::invariant_mutex::InvariantMutex;
use crate::ops::FuseOps;
use crate::reply::*;
use crate::types::*;

pub(crate) struct ForgetFsImpl {
    config: ForgetFsConfig,
    table: InvariantMutex<InodeTable>,
}

impl ForgetFsImpl {
    pub(crate) fn new(config: ForgetFsConfig) -> Self {
        Self {
            config,
            table: InvariantMutex::new(InodeTable::new(), InodeTable::check_invariants),
        }
    }

    pub(crate) fn config(&self) -> &ForgetFsConfig {
        &self.config
    }

    /// Abort if any inode has lookups the kernel never forgot. For use after
    /// unmount, once no more requests are delivered.
    pub(crate) fn check(&self) {
        let table = self.table.lock();

        if !self.config.forget_delivery_reliable {
            info!("forget delivery is unreliable on this host, skipping lookup count check");
            return;
        }

        if let Err(violation) = table.check_drained() {
            fatal(violation);
        }
        info!(inodes = table.len(), "all lookup counts drained");
    }

    /// The two names that resolve in this filesystem.
    fn resolve_child(parent: InodeId, name: &str) -> Option<InodeId> {
        match (parent, name) {
            (ROOT_INODE_ID, FOO_NAME) => Some(FOO_INODE_ID),
            (ROOT_INODE_ID, BAR_NAME) => Some(BAR_INODE_ID),
            _ => None,
        }
    }

    fn make_entry(&self, id: InodeId, attributes: InodeAttributes) -> FuseEntryParam {
        FuseEntryParam::new(
            attributes.to_file_attr(id),
            self.config.attr_timeout_duration(),
            self.config.entry_timeout_duration(),
        )
    }

    /// Mint a child under `parent`. The child is never linked under a name,
    /// so it is reachable only through the returned id.
    fn mint_child(&self, parent: u64, attributes: InodeAttributes) -> FuseEntryParam {
        let mut table = self.table.lock();
        table.find_inode_by_id(InodeId(parent));
        let (id, attributes) = table.mint(attributes);
        drop(table);

        self.make_entry(id, attributes)
    }

    #[cfg(test)]
    pub(crate) fn lookup_count(&self, id: InodeId) -> Option<u64> {
        self.table.lock().lookup_count(id)
    }
}

#[async_trait::async_trait]
impl FuseOps for ForgetFsImpl {
    async fn init(&self, conn_info: &mut FuseConnInfo) -> FuseResult<()> {
        info!(proto_major = conn_info.proto_major, "forgetfs init");
        Ok(())
    }

    async fn destroy(&self) {
        info!("forgetfs destroy");
    }

    async fn lookup(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
    ) -> FuseResult<ReplyEntry> {
        let parent_id = InodeId(parent);
        debug!(parent = %parent_id, name, pid = ctx.pid, "lookup");

        let mut table = self.table.lock();
        table.find_inode_by_id(parent_id);

        let child_id = Self::resolve_child(parent_id, name).ok_or(libc::ENOENT)?;
        let child = table.find_inode_by_id(child_id);
        child.increment_lookup_count();
        let attributes = child.attributes();
        drop(table);

        Ok(ReplyEntry {
            entry: self.make_entry(child_id, attributes),
        })
    }

    async fn forget(&self, ino: u64, nlookup: u64) {
        let inode_id = InodeId(ino);
        debug!(ino = %inode_id, nlookup, "forget");
        self.table.lock().forget(inode_id, nlookup);
    }

    async fn getattr(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        _fh: Option<u64>,
    ) -> FuseResult<ReplyAttr> {
        let inode_id = InodeId(ino);
        debug!(ino = %inode_id, pid = ctx.pid, "getattr");

        let attributes = self.table.lock().find_inode_by_id(inode_id).attributes();
        Ok(ReplyAttr {
            attr: attributes.to_file_attr(inode_id),
            attr_timeout: self.config.attr_timeout_duration(),
        })
    }

    async fn mkdir(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
        _mode: u32,
    ) -> FuseResult<ReplyEntry> {
        debug!(parent, name, pid = ctx.pid, "mkdir");
        let entry = self.mint_child(parent, InodeAttributes::directory(0));
        Ok(ReplyEntry { entry })
    }

    async fn create(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
        _mode: u32,
        flags: i32,
    ) -> FuseResult<ReplyCreate> {
        debug!(parent, name, flags, pid = ctx.pid, "create");
        let entry = self.mint_child(parent, InodeAttributes::regular(0));
        Ok(ReplyCreate {
            entry,
            fh: 0,
            flags: 0,
        })
    }

    // Content I/O is unsupported: open only validates the inode, and read or
    // write fall through to ENOSYS.
    async fn open(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        flags: i32,
    ) -> FuseResult<ReplyOpen> {
        let inode_id = InodeId(ino);
        debug!(ino = %inode_id, flags, pid = ctx.pid, "open");
        self.table.lock().find_inode_by_id(inode_id);
        Ok(ReplyOpen::default())
    }

    async fn opendir(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
    ) -> FuseResult<ReplyOpen> {
        let inode_id = InodeId(ino);
        debug!(ino = %inode_id, pid = ctx.pid, "opendir");
        self.table.lock().find_inode_by_id(inode_id);
        Ok(ReplyOpen::default())
    }
}
