//! Core building blocks for the intake drop-folder watcher.
//!
//! The pipeline turns a noisy stream of filesystem notifications into
//! exactly one processing invocation per file that has finished being
//! written:
//!
//! - [`source::EventSource`] bridges `notify` into [`events::RawEvent`]s;
//! - [`events::Normalizer`] deduplicates them into [`events::Candidate`]s
//!   (one in flight per path) and flips a cancel flag when a candidate's
//!   file is deleted mid-flight;
//! - [`settle::wait_until_stable`] polls a candidate's size until it
//!   holds steady, vanishes, or runs out of attempts;
//! - [`dispatch::Dispatcher`] drives settled candidates through a
//!   [`dispatch::ProcessHook`], by default [`dispatch::DestinationMover`],
//!   which moves files with collision-safe renaming via [`place::place`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod place;
pub mod settle;
pub mod source;

pub use config::IntakeConfig;
pub use dispatch::{DestinationMover, Dispatcher, ProcessHook, ProcessOutcome};
pub use error::{IntakeError, Result};
pub use events::{Candidate, InFlightSet, Normalizer, RawEvent, RawEventKind, WatchMessage};
pub use place::{PlaceOutcome, place};
pub use settle::{FsProbe, SettleResult, SettleStatus, SizeProbe, wait_until_stable};
pub use source::EventSource;
