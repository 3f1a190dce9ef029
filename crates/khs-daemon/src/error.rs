use khs_core::errors::StoreError;
use khs_core::keyspace::KeyspaceError;
use khs_core::rule_split::RuleSplitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Keyspace(#[from] KeyspaceError),

    #[error(transparent)]
    RuleSplit(#[from] RuleSplitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
