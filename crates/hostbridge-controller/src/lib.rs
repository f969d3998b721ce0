//! # hostbridge-controller — the privileged side of the bridge
//!
//! The controller owns the session: it spawns the service thread that
//! polls the request channels, performs the real host operations
//! through the backend traits, posts completions, and flushes coalesced
//! display output on a fixed cadence.
//!
//! The service thread is never allowed to block on guest progress. The
//! one operation that must wait for the guest (streaming an HTTP body
//! chunk-by-chunk under acknowledgment backpressure) runs on a spawned
//! streamer thread instead.

pub mod backends;
pub mod display;
pub mod session;

mod service;

pub use backends::http::UreqHttp;
pub use backends::store::{DirStore, MemStore};
pub use session::{InitError, Session};
