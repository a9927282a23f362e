//! `junction-core`: the protocol- and concurrency-substrate a
//! multi-protocol network server is built on. HTTP/1.1, HTTP/2,
//! HTTP/3, and WebSocket codecs share one non-blocking transport layer,
//! one reactor-loop pool, and one request/response contract, so
//! application code written against [`contract`] runs unmodified on
//! any of the three HTTP versions.
//!
//! Higher-level concerns this crate does not own — servlet containers,
//! mailbox storage, the cryptographic rules behind SPF/DKIM/DMARC,
//! FTP filesystem backends, and configuration parsing — sit on top of
//! it and are out of scope here.

pub mod contract;
pub mod error;
pub mod headers;
pub mod listener;
pub mod reactor;
pub mod server;
pub mod transport;
pub mod util;

pub mod auth;

#[cfg(feature = "http1")]
pub mod h1;

#[cfg(feature = "http2")]
pub mod h2;

#[cfg(feature = "http3")]
pub mod h3;

#[cfg(feature = "websocket")]
pub mod ws;

pub use error::{Error, ErrorCategory};
