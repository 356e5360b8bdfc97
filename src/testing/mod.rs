//! Testing utilities that avoid a live broker

pub mod mocks;

pub use mocks::*;
