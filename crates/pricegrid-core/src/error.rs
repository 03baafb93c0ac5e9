use thiserror::Error;

use crate::models::GroupKey;

/// A persistence failure while reconciling one group.
///
/// Carries the group key so callers can report the failure and move on
/// to the next group.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to lock {key}: {source}")]
    Lock {
        key: GroupKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load combinations for {key}: {source}")]
    Load {
        key: GroupKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to insert combinations for {key} (batch {batch}): {source}")]
    Insert {
        key: GroupKey,
        batch: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to delete obsolete combinations for {key}: {source}")]
    Delete {
        key: GroupKey,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    pub fn key(&self) -> &GroupKey {
        match self {
            SyncError::Lock { key, .. }
            | SyncError::Load { key, .. }
            | SyncError::Insert { key, .. }
            | SyncError::Delete { key, .. } => key,
        }
    }
}
