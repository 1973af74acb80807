//! Speak arbitrary text with a curated preset voice, using whatever voices the
//! host speech engine happens to expose.
//!
//! [`discovery`] finds the host's voices (retrying while the host is still
//! loading) and maps each preset onto one of them via [`matcher`] and
//! [`quality`]. [`playback`] supervises one utterance at a time on top of that
//! mapping. [`studio::Studio`] ties both together for a front end.

pub mod backends;
pub mod catalog;
pub mod config_loader;
pub mod discovery;
pub mod error;
pub mod matcher;
pub mod playback;
pub mod quality;
pub mod studio;

pub use error::{SpeechError, SpeechResult};
