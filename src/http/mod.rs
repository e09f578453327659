//! HTTP message model shared by the proxy and the guard

mod message;

pub use message::{host_from_uri, HttpMessage};
