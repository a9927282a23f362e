//! Shared low-level utilities: byte/hex conversion, constant-time
//! equality, and the RFC 7541 HPACK static table shared by the HPACK
//! and QPACK header-compression paths.

pub mod ct;
pub mod hex;
pub mod static_table;
