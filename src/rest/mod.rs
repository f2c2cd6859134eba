//! REST transport: the HTTP client and the connection handle.

pub mod client;
pub mod http;

pub use client::Bugzilla;
pub use http::RestHttpClient;
