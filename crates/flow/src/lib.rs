//! The aggregation pipeline: namespaces, the message filter tree, and the
//! worker tasks that connect bus, stores, and monitors with bounded queues.

pub mod filter_tree;
pub mod namespace;
pub mod pipeline;

pub use filter_tree::FilterTree;
pub use namespace::{Namespace, NamespaceError};
pub use pipeline::{
    acks, consumer, monitor_ticker, monitor_worker, producer, store_ticker, WriteJob,
    ACK_QUEUE_CAPACITY, MONITOR_TICK_QUEUE_CAPACITY, WRITE_QUEUE_CAPACITY,
};
