//! Sans-I/O state machines for the query protocols.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the driver what to do next.

pub mod action;
pub mod extended;
pub mod simple_query;

pub use action::{Action, AsyncMessage};
pub use extended::{ItemResult, Phase, PipelineItem, PipelineStateMachine, ResultSource};
pub use simple_query::SimpleQueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::types::TransactionStatus;

/// A protocol exchange driven by a sync or async driver.
pub trait StateMachine {
    /// Advance using the message in `buffer_set` (or start, on the first call).
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Transaction status reported by the final ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;
}
