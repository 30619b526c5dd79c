//! seglog: a durable, segmented, append-only write-ahead log.
//!
//! Records are framed with a length prefix and a per-record CRC-32, numbered
//! by a log-wide monotonic sequence, and stored across `segment-<N>` files
//! that rotate by size and are garbage-collected from the low end. A
//! background task periodically drains the write buffer; `repair` truncates
//! a corrupted tail on the newest segment.

pub mod config;
pub mod directory;
pub mod error;
pub mod log;
pub mod record;
pub mod segment;
mod syncer;

pub use config::Options;
pub use error::{ReadError, Result, WalError};
pub use log::Wal;
pub use record::Record;
