//! Worker process management
//!
//! This module contains the `WorkerHandle` that owns one running inference
//! worker and the signals it reports back to the controller.

mod process;

pub use process::{WorkerEvent, WorkerExit, WorkerHandle, WorkerId, WorkerSignal};
