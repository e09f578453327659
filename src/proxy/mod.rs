//! Guarding forward proxy
//!
//! Plain HTTP requests are parsed and run through the decision engine;
//! CONNECT tunnels are checked by host and then relayed untouched.

mod server;

pub use server::ProxyServer;
