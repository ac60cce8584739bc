//! Mock transport implementations for testing and development.
//!
//! This module provides a simulated serial line that can be controlled
//! programmatically without requiring physical hardware.

pub mod serial;

pub use serial::{MockSerial, MockSerialHandle, MockSerialOpener};
