//! Store implementations
//!
//! - [`postgres`]: sqlx-backed source reader, document store, mapping store
//!   and run repository
//! - [`memory`]: in-process equivalents with the same semantics

pub mod memory;
pub mod postgres;
