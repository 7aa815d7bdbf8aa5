//! Batch accumulation.
//!
//! Validated records are buffered in an open batch that seals on record
//! count, estimated size or linger time, whichever comes first.

mod accumulator;
mod batch;

pub use accumulator::{BatchAccumulator, OfferOutcome};
pub use batch::{Batch, SealReason};
