//! The batch execution engine.
//!
//! A drained [`BatchQueue`] is run with one of three strategies picked by
//! [`select_strategy`]: one round trip per entry, multi-value INSERT
//! chunks, or multi-statement scripts. Chunk sizes come from
//! [`values_per_round_trip`]; counts are gathered by
//! [`ResultAccumulator`] and failures by [`FailureCollector`].

pub mod accumulator;
pub mod executor;
pub mod failure;
pub mod queue;
pub mod sizing;
pub mod strategy;

pub use accumulator::{GeneratedKeysLedger, ResultAccumulator, compensate_on_duplicate_key_update};
pub use executor::{
    BatchContext, PreparedTarget, execute_prepared_batch, execute_single, execute_sql, execute_statement_batch,
};
pub use failure::{FailureCollector, has_deadlock_or_timeout_rolled_back_tx, is_fatal_for_batch};
pub use queue::{BatchEntry, BatchQueue, DrainedBatch};
pub use sizing::{ChunkPlan, plan_statement_chunks, values_per_round_trip};
pub use strategy::{BatchShape, Strategy, select_plain_strategy, select_strategy};
