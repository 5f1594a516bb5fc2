//! Error types.
//!
//! Two tiers exist. Ordinary conditions a kernel may legitimately provoke
//! (a lookup of a missing name) travel as errno values through `FuseResult`.
//! Breaches of the lookup/forget contract are `ProtocolViolation`s and are
//! never returned: they go through [`fatal`], which panics.

use crate::types::InodeId;

/// A breach of the lookup/forget protocol between kernel and filesystem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// The kernel referenced an id this filesystem never issued.
    #[error("Unknown inode: {0}")]
    UnknownInode(InodeId),

    /// The kernel referenced an inode after forgetting all of its lookups.
    #[error("Forgotten inode: {0}")]
    ForgottenInode(InodeId),

    /// A forget asked for more lookups than are outstanding.
    #[error("Overly large decrement: {count}, {n}")]
    OverlyLargeDecrement { count: u64, n: u64 },

    /// An id in the table is not below the next id to mint.
    #[error("Unexpectedly large inode ID: {id} (next to mint is {next})")]
    UnexpectedlyLargeInodeId { id: InodeId, next: InodeId },

    /// The root was left with more than the single implicit lookup.
    #[error("Root has lookup count {0}")]
    RootLookupCount(u64),

    /// Minting would overflow the id space.
    #[error("Inode IDs exhausted at {0}")]
    InodeIdsExhausted(InodeId),

    /// A non-root inode still has outstanding lookups after unmount.
    #[error("Inode {id} has lookup count {count}")]
    LeakedLookupCount { id: InodeId, count: u64 },
}

/// Report a protocol violation and abort the current operation.
///
/// The violation is logged before unwinding so it is visible even when the
/// panic is later re-raised on another task.
#[track_caller]
pub fn fatal(violation: ProtocolViolation) -> ! {
    tracing::error!(%violation, "lookup/forget protocol violation");
    panic!("{violation}");
}

/// Fatal-tier result: `Err` is handed to [`fatal`] by the caller.
pub type CheckResult = std::result::Result<(), ProtocolViolation>;

/// Errors on the requesting side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    /// The serving loop is gone, or dropped the request without replying.
    #[error("filesystem server disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_messages() {
        assert_eq!(
            ProtocolViolation::UnknownInode(InodeId(17)).to_string(),
            "Unknown inode: 17"
        );
        assert_eq!(
            ProtocolViolation::OverlyLargeDecrement { count: 1, n: 2 }.to_string(),
            "Overly large decrement: 1, 2"
        );
        assert_eq!(
            ProtocolViolation::LeakedLookupCount {
                id: InodeId(5),
                count: 1
            }
            .to_string(),
            "Inode 5 has lookup count 1"
        );
    }

    #[test]
    #[should_panic(expected = "Forgotten inode: 2")]
    fn test_fatal_panics_with_violation_message() {
        fatal(ProtocolViolation::ForgottenInode(InodeId(2)));
    }
}
