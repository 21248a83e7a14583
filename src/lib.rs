//! Controller for a barcode-driven music box.
//!
//! Hardware inputs are turned into commands for a remote playback service:
//!
//! * [`button`] - transport buttons with short and long presses
//! * [`scan`] - presence-triggered barcode scan sessions
//! * [`tray`] - optical disc insertion
//!
//! Commands flow through the [`intent::Dispatcher`] to the [`remote`]
//! client, which also keeps the [`state`] cache up to date.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod button;
pub mod config;
pub mod error;
pub mod gpio;
pub mod intent;
pub mod protocol;
pub mod remote;
pub mod scan;
pub mod signal;
pub mod state;
pub mod tray;
