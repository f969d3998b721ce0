//! # hostbridge-guest — blocking facades for the sandboxed side
//!
//! A guest thread attaches a [`BridgeHandle`] to the session's shared
//! region and calls plain blocking functions: read a line of input,
//! fetch a URL, read or write a file. Each call becomes one protocol
//! round trip (or none, when the local stdin buffer or the tree cache
//! can answer), serviced by the controller on the other side.
//!
//! The facades never busy-wait; every wait parks on the channel's
//! native primitive with a bound.

pub mod handle;
pub mod http;
pub mod relay;
pub mod stdin;
pub mod storage;
pub mod tree;

pub use handle::BridgeHandle;
pub use http::{BodyStream, HttpResponse};
pub use relay::RelayPollable;
pub use stdin::StdinRead;
pub use tree::TreeCache;
