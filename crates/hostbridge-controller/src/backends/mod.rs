//! Concrete host backends serviced by the controller.

pub mod http;
pub mod store;
