//! Live MIDI to LED strip and smart-bulb lighting.

pub mod bulb;
pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod led;
pub mod note;
pub mod serial;
pub mod tracker;

pub use error::{Error, Result};
