//! The asynchronous request pipeline.
//!
//! Three bounded queues, one drain worker each: the engine consumes
//! inbound jobs, the delivery worker posts outbound replies, the index
//! worker records completed turns. Synchronous requests carry a oneshot
//! channel through the inbound queue and never touch the outbound one.

pub mod delivery;
pub mod engine;
pub mod index;
pub mod queues;

pub use delivery::DeliveryWorker;
pub use engine::Engine;
pub use index::{IndexWorker, LoggingIndexer, TurnIndexer};
pub use queues::{InboundJob, IndexJob, QueueReplySink};
