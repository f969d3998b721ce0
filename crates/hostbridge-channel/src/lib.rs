//! # hostbridge-channel — the shared synchronization protocol
//!
//! One logical resource (stdin, HTTP, storage) gets one
//! [`RequestChannel`]: a control block of atomic words plus a bounded
//! payload region, with at most one outstanding request at a time. The
//! worker side writes a request frame, raises `request_ready`, and
//! parks; the controller side takes the request, performs the real
//! operation, writes the response, raises `response_ready`, and wakes
//! the parker.
//!
//! Large bodies do not travel through the request/response slot; they
//! stream through a [`ChunkMailbox`], a single-slot handoff in which
//! the writer must observe an explicit consumed acknowledgment for
//! chunk *k* before writing chunk *k+1*.
//!
//! Parking (the wait/notify primitive under both) is platform-specific:
//! futex on Linux, condvar elsewhere.

pub mod control;
pub mod frame;
pub mod mailbox;
pub mod parking;
pub mod shared;

pub use control::RequestChannel;
pub use frame::Frame;
pub use mailbox::ChunkMailbox;
pub use shared::SessionShared;
