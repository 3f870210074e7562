//! # moodcast common library
//!
//! Shared code for the moodcast dispatcher crates:
//! - Error taxonomy (`Error`, `Result`)
//! - Bootstrap configuration loading (TOML, environment, CLI overrides)
//! - Mood keys and chat-facing mood buttons
//! - Time helpers for audit timestamps

pub mod config;
pub mod error;
pub mod mood;
pub mod time;

pub use error::{Error, Result};
pub use mood::{MoodButton, MoodKey};
