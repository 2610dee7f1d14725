//! Reconciliation cadence.

/// Fixed period of the background reconciliation loop, in seconds.
pub const RECONCILIATION_INTERVAL_SECS: u64 = 5 * 60;

/// Upper bound of queue entries handled in one drain.
pub const SYNC_DRAIN_BATCH_LIMIT: i64 = 500;
