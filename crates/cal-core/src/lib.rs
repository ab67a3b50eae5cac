//! # cal-core
//!
//! Shared building blocks for the calibration crates: the ragged per-event
//! container, the event batch and its object records, kinematic helpers,
//! data-taking years and the hash-seeded random draws used for smearing.

#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod jagged;
pub mod kinematics;
pub mod prng;
pub mod year;

pub use error::{Error, Result};
pub use event::{Electron, EventBatch, Jet, Met, Muon, PrefireWeight, Tau, TrigObj};
pub use jagged::Jagged;
pub use kinematics::{Kinematics, delta_phi, delta_r};
pub use year::Year;
