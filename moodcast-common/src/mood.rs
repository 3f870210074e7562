//! Mood keys and chat-facing mood buttons
//!
//! A mood key names both a dispatch category and the folder under `tracks/`
//! that holds its audio files.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of mood categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodKey {
    Happy,
    Calm,
    Energy,
    Sad,
    Angry,
    Surprise,
    Nostalgia,
}

impl MoodKey {
    /// Every mood key, in declaration order
    pub const ALL: [MoodKey; 7] = [
        MoodKey::Happy,
        MoodKey::Calm,
        MoodKey::Energy,
        MoodKey::Sad,
        MoodKey::Angry,
        MoodKey::Surprise,
        MoodKey::Nostalgia,
    ];

    /// Lowercase name, also used as the remote folder name
    pub fn as_str(&self) -> &'static str {
        match self {
            MoodKey::Happy => "happy",
            MoodKey::Calm => "calm",
            MoodKey::Energy => "energy",
            MoodKey::Sad => "sad",
            MoodKey::Angry => "angry",
            MoodKey::Surprise => "surprise",
            MoodKey::Nostalgia => "nostalgia",
        }
    }
}

impl fmt::Display for MoodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoodKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MoodKey::ALL
            .into_iter()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| Error::InvalidInput(format!("unknown mood key '{}'", s)))
    }
}

/// Chat button that selects a mood
///
/// Button ids are what the chat layer sends back when a user taps a button,
/// so they can be playful aliases rather than bare mood names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodButton {
    /// Callback id sent by the chat layer (e.g. "rave")
    pub id: String,
    /// Text shown on the button
    pub label: String,
    /// Mood the button selects
    pub mood: MoodKey,
}

impl MoodButton {
    pub fn new(id: impl Into<String>, label: impl Into<String>, mood: MoodKey) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            mood,
        }
    }

    /// Built-in button set
    pub fn defaults() -> Vec<MoodButton> {
        vec![
            MoodButton::new("rave", "🕺 Disco in my bones", MoodKey::Happy),
            MoodButton::new("zen", "🧘 Morning yoga with the toaster", MoodKey::Calm),
            MoodButton::new("retro", "📼 Cassette nostalgia", MoodKey::Nostalgia),
            MoodButton::new("turbo", "⚡ Caffeine and milk", MoodKey::Energy),
        ]
    }
}

/// Resolve a chat selection to a mood key
///
/// Accepts either a configured button id or a bare mood name. Button ids win
/// when both match.
pub fn resolve_selection(buttons: &[MoodButton], selection: &str) -> Option<MoodKey> {
    let selection = selection.trim();
    buttons
        .iter()
        .find(|b| b.id.eq_ignore_ascii_case(selection))
        .map(|b| b.mood)
        .or_else(|| selection.parse().ok())
}
