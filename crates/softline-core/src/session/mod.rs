//! Session lifecycle
//!
//! The [`Softphone`] handle fronts a single controller task that owns the one
//! session slot. The controller handles engine events before any command queued
//! behind them.

mod controller;
mod softphone;
mod state;

pub use softphone::Softphone;
pub use state::{SessionDirection, SessionKey, SessionState};
