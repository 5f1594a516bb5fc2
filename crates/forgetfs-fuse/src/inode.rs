//! Inode state management.
//!
//! `Inode` carries the lookup-count state machine; `InodeTable` owns every
//! inode ever issued, keyed by id. The table itself is not synchronized: the
//! filesystem keeps it inside an [`InvariantMutex`](crate::invariant_mutex)
//! whose boundary check is [`InodeTable::check_invariants`].

use std::collections::BTreeMap;

use crate::error::{fatal, CheckResult, ProtocolViolation};
use crate::types::*;

// ── Inode ───────────────────────────────────────────────────────────────────

/// An in-memory inode with its kernel lookup count.
#[derive(Debug, Clone)]
pub struct Inode {
    attributes: InodeAttributes,
    /// Outstanding kernel references.
    lookup_count: u64,
    /// Whether `lookup_count` has ever been positive.
    looked_up: bool,
}

impl Inode {
    pub fn new(attributes: InodeAttributes) -> Self {
        Self {
            attributes,
            lookup_count: 0,
            looked_up: false,
        }
    }

    pub fn attributes(&self) -> InodeAttributes {
        self.attributes
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookup_count
    }

    /// True once every lookup of a previously looked-up inode is forgotten.
    ///
    /// An inode that was never looked up is not forgotten, even at zero.
    pub fn forgotten(&self) -> bool {
        self.looked_up && self.lookup_count == 0
    }

    pub fn increment_lookup_count(&mut self) {
        self.lookup_count += 1;
        self.looked_up = true;
    }

    /// Drop `n` lookups. Asking for more than are outstanding is a violation
    /// and leaves the count untouched.
    pub fn decrement_lookup_count(&mut self, n: u64) -> CheckResult {
        if self.lookup_count < n {
            return Err(ProtocolViolation::OverlyLargeDecrement {
                count: self.lookup_count,
                n,
            });
        }
        self.lookup_count -= n;
        Ok(())
    }
}

// ── Inode table ─────────────────────────────────────────────────────────────

/// Every inode issued so far, by id.
///
/// Inodes are never removed. A forgotten inode stays in the table so that a
/// later reference to its id is recognized as a violation rather than as an
/// unknown id being reused.
#[derive(Debug)]
pub struct InodeTable {
    inodes: BTreeMap<InodeId, Inode>,
    // INVARIANT: for each k in inodes, k < next_inode_id
    next_inode_id: InodeId,
}

impl InodeTable {
    /// Create the table with the root, `foo` and `bar` pre-populated.
    ///
    /// The root starts with the single lookup the kernel holds implicitly.
    pub fn new() -> Self {
        let mut inodes = BTreeMap::new();
        inodes.insert(ROOT_INODE_ID, Inode::new(InodeAttributes::directory(1)));
        inodes.insert(FOO_INODE_ID, Inode::new(InodeAttributes::regular(1)));
        inodes.insert(BAR_INODE_ID, Inode::new(InodeAttributes::directory(1)));

        let mut table = Self {
            inodes,
            next_inode_id: FIRST_MINTED_INODE_ID,
        };
        table.find_inode_by_id(ROOT_INODE_ID).increment_lookup_count();
        table
    }

    /// Id ordering: nothing in the table at or beyond the next id to mint.
    pub fn check_invariants(&self) -> CheckResult {
        match self.inodes.keys().next_back() {
            Some(&id) if id >= self.next_inode_id => {
                Err(ProtocolViolation::UnexpectedlyLargeInodeId {
                    id,
                    next: self.next_inode_id,
                })
            }
            _ => Ok(()),
        }
    }

    /// Every lookup forgotten, except possibly the root's implicit one.
    pub fn check_drained(&self) -> CheckResult {
        for (&id, inode) in &self.inodes {
            let count = inode.lookup_count();
            if id == ROOT_INODE_ID {
                if count > 1 {
                    return Err(ProtocolViolation::RootLookupCount(count));
                }
                continue;
            }
            if count != 0 {
                return Err(ProtocolViolation::LeakedLookupCount { id, count });
            }
        }
        Ok(())
    }

    /// Resolve `id` to a live inode, without aborting.
    pub fn try_find(&self, id: InodeId) -> Result<&Inode, ProtocolViolation> {
        let inode = self
            .inodes
            .get(&id)
            .ok_or(ProtocolViolation::UnknownInode(id))?;
        if inode.forgotten() {
            return Err(ProtocolViolation::ForgottenInode(id));
        }
        Ok(inode)
    }

    /// Resolve `id` to a live inode. Unknown and forgotten ids are fatal.
    pub fn find_inode_by_id(&mut self, id: InodeId) -> &mut Inode {
        let Some(inode) = self.inodes.get_mut(&id) else {
            fatal(ProtocolViolation::UnknownInode(id));
        };
        if inode.forgotten() {
            fatal(ProtocolViolation::ForgottenInode(id));
        }
        inode
    }

    /// Issue a new inode holding one lookup for its creator.
    pub fn mint(&mut self, attributes: InodeAttributes) -> (InodeId, InodeAttributes) {
        let id = self.next_inode_id;
        let Some(next) = id.next() else {
            fatal(ProtocolViolation::InodeIdsExhausted(id));
        };
        self.next_inode_id = next;

        let mut inode = Inode::new(attributes);
        inode.increment_lookup_count();
        self.inodes.insert(id, inode);
        (id, attributes)
    }

    /// Drop `n` lookups from a live inode. Over-large decrements are fatal.
    pub fn forget(&mut self, id: InodeId, n: u64) {
        if let Err(violation) = self.find_inode_by_id(id).decrement_lookup_count(n) {
            fatal(violation);
        }
    }

    pub fn next_inode_id(&self) -> InodeId {
        self.next_inode_id
    }

    /// Number of inodes ever issued, forgotten ones included.
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// Current lookup count of `id`, if it was ever issued.
    pub fn lookup_count(&self, id: InodeId) -> Option<u64> {
        self.inodes.get(&id).map(Inode::lookup_count)
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, id: InodeId, inode: Inode) {
        self.inodes.insert(id, inode);
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_inode_is_not_forgotten() {
        let inode = Inode::new(InodeAttributes::regular(0));
        assert_eq!(inode.lookup_count(), 0);
        assert!(!inode.forgotten());
    }

    #[test]
    fn test_forgotten_after_full_decrement() {
        let mut inode = Inode::new(InodeAttributes::regular(0));
        inode.increment_lookup_count();
        inode.increment_lookup_count();
        assert!(inode.decrement_lookup_count(1).is_ok());
        assert!(!inode.forgotten());
        assert!(inode.decrement_lookup_count(1).is_ok());
        assert!(inode.forgotten());
    }

    #[test]
    fn test_overly_large_decrement_does_not_clamp() {
        let mut inode = Inode::new(InodeAttributes::regular(0));
        inode.increment_lookup_count();
        assert_eq!(
            inode.decrement_lookup_count(2),
            Err(ProtocolViolation::OverlyLargeDecrement { count: 1, n: 2 })
        );
        assert_eq!(inode.lookup_count(), 1);
    }

    #[test]
    fn test_zero_decrement_of_fresh_inode() {
        let mut inode = Inode::new(InodeAttributes::directory(1));
        assert!(inode.decrement_lookup_count(0).is_ok());
        assert!(!inode.forgotten());
    }

    #[test]
    fn test_table_new_has_canned_inodes() {
        let table = InodeTable::new();
        assert_eq!(table.len(), 3);
        assert_eq!(table.next_inode_id(), FIRST_MINTED_INODE_ID);
        assert_eq!(table.lookup_count(ROOT_INODE_ID), Some(1));
        assert_eq!(table.lookup_count(FOO_INODE_ID), Some(0));
        assert_eq!(table.lookup_count(BAR_INODE_ID), Some(0));
        assert!(table.check_invariants().is_ok());
        assert!(table.check_drained().is_ok());
    }

    #[test]
    fn test_canned_attributes() {
        let table = InodeTable::new();
        let foo = table.try_find(FOO_INODE_ID).unwrap().attributes();
        assert!(!foo.is_directory());
        assert_eq!(foo.nlink, 1);
        let bar = table.try_find(BAR_INODE_ID).unwrap().attributes();
        assert!(bar.is_directory());
        assert_eq!(bar.nlink, 1);
    }

    #[test]
    fn test_mint_issues_increasing_ids() {
        let mut table = InodeTable::new();
        let (a, attrs) = table.mint(InodeAttributes::directory(0));
        let (b, _) = table.mint(InodeAttributes::regular(0));
        assert_eq!(a, FIRST_MINTED_INODE_ID);
        assert!(b > a);
        assert_eq!(attrs.nlink, 0);
        assert_eq!(table.lookup_count(a), Some(1));
        assert_eq!(table.lookup_count(b), Some(1));
        assert!(table.check_invariants().is_ok());
    }

    #[test]
    fn test_try_find_unknown_and_forgotten() {
        let mut table = InodeTable::new();
        assert_eq!(
            table.try_find(InodeId(99)).unwrap_err(),
            ProtocolViolation::UnknownInode(InodeId(99))
        );

        let (id, _) = table.mint(InodeAttributes::regular(0));
        table.forget(id, 1);
        assert_eq!(
            table.try_find(id).unwrap_err(),
            ProtocolViolation::ForgottenInode(id)
        );
    }

    #[test]
    #[should_panic(expected = "Unknown inode: 42")]
    fn test_find_unknown_is_fatal() {
        let mut table = InodeTable::new();
        table.find_inode_by_id(InodeId(42));
    }

    #[test]
    #[should_panic(expected = "Forgotten inode: 4")]
    fn test_find_forgotten_is_fatal() {
        let mut table = InodeTable::new();
        let (id, _) = table.mint(InodeAttributes::regular(0));
        table.forget(id, 1);
        table.find_inode_by_id(id);
    }

    #[test]
    fn test_find_returns_live_inode_for_mutation() {
        let mut table = InodeTable::new();
        table.find_inode_by_id(FOO_INODE_ID).increment_lookup_count();
        assert_eq!(table.lookup_count(FOO_INODE_ID), Some(1));
    }

    #[test]
    #[should_panic(expected = "Inode IDs exhausted at 18446744073709551615")]
    fn test_mint_at_id_space_end_is_fatal() {
        let mut table = InodeTable::new();
        table.next_inode_id = InodeId(u64::MAX);
        table.mint(InodeAttributes::regular(0));
    }

    #[test]
    fn test_mint_just_below_id_space_end() {
        let mut table = InodeTable::new();
        table.next_inode_id = InodeId(u64::MAX - 1);
        let (id, _) = table.mint(InodeAttributes::regular(0));
        assert_eq!(id, InodeId(u64::MAX - 1));
        assert_eq!(table.next_inode_id(), InodeId(u64::MAX));
        assert!(table.check_invariants().is_ok());
    }

    #[test]
    #[should_panic(expected = "Overly large decrement: 1, 3")]
    fn test_forget_too_many_is_fatal() {
        let mut table = InodeTable::new();
        let (id, _) = table.mint(InodeAttributes::directory(0));
        table.forget(id, 3);
    }

    #[test]
    fn test_check_invariants_detects_large_id() {
        let mut table = InodeTable::new();
        table.insert_raw(InodeId(100), Inode::new(InodeAttributes::regular(0)));
        assert_eq!(
            table.check_invariants(),
            Err(ProtocolViolation::UnexpectedlyLargeInodeId {
                id: InodeId(100),
                next: FIRST_MINTED_INODE_ID,
            })
        );
    }

    #[test]
    fn test_check_drained_reports_live_inode() {
        let mut table = InodeTable::new();
        let (id, _) = table.mint(InodeAttributes::regular(0));
        assert_eq!(
            table.check_drained(),
            Err(ProtocolViolation::LeakedLookupCount { id, count: 1 })
        );
        table.forget(id, 1);
        assert!(table.check_drained().is_ok());
    }

    #[test]
    fn test_check_drained_root_limits() {
        let mut table = InodeTable::new();
        table.find_inode_by_id(ROOT_INODE_ID).increment_lookup_count();
        assert_eq!(
            table.check_drained(),
            Err(ProtocolViolation::RootLookupCount(2))
        );

        table.forget(ROOT_INODE_ID, 2);
        assert!(table.check_drained().is_ok());
    }
}
