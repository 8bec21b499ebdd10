//! Testing utilities and mock implementations
//!
//! An in-memory [`MockConnector`] lets the supervisor be exercised without a
//! broker.

pub mod mocks;

pub use mocks::*;
