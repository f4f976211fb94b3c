//! Real-time licence plate recognition over live video streams.
//!
//! The workspace crates are re-exported here so integration tests and
//! embedding applications can depend on a single package.

pub use common;
pub use plate_engine;
pub use stream_node;
