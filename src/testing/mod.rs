//! Test support
//!
//! Mock session driver implementations for exercising the publish
//! coordinator without a broker or network.

pub mod mocks;

pub use mocks::{MockAck, MockConnect, MockSession};
