//! Chat-facing adapter
//!
//! Turns inbound chat events (a mood button press, an uploaded photo) into
//! dispatches and dispatch results into outbound deliveries: either a track
//! to send or a plain notice.

use crate::services::{DispatchOrchestrator, DispatchResult};
use moodcast_common::mood::resolve_selection;
use moodcast_common::MoodButton;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const NO_TRACKS_MESSAGE: &str = "No tracks in this category yet.";
pub const CATEGORY_NOT_FOUND_MESSAGE: &str = "Track category not found.";
pub const UNAVAILABLE_MESSAGE: &str = "Tracks are temporarily unavailable, please try again later.";
pub const UNKNOWN_MOOD_MESSAGE: &str = "Unknown mood";
pub const EMPTY_PHOTO_MESSAGE: &str = "Please send a photo with a face in it.";
pub const PHOTO_FAILED_MESSAGE: &str = "Could not process the photo, please try again.";

/// Outbound chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    Track { chat_id: i64, name: String, url: String },
    Notice { chat_id: i64, message: String },
}

impl Delivery {
    pub fn notice(chat_id: i64, message: impl Into<String>) -> Self {
        Delivery::Notice {
            chat_id,
            message: message.into(),
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Delivery::Track { chat_id, .. } | Delivery::Notice { chat_id, .. } => *chat_id,
        }
    }
}

/// Map a dispatch outcome to what the chat receives
pub fn delivery_for(chat_id: i64, result: &DispatchResult) -> Delivery {
    match result {
        DispatchResult::Track { name, url, .. } => Delivery::Track {
            chat_id,
            name: name.clone(),
            url: url.clone(),
        },
        DispatchResult::NoTrackAvailable { .. } => Delivery::notice(chat_id, NO_TRACKS_MESSAGE),
        DispatchResult::CategoryNotFound { .. } => Delivery::notice(chat_id, CATEGORY_NOT_FOUND_MESSAGE),
        DispatchResult::TemporarilyUnavailable { .. } => Delivery::notice(chat_id, UNAVAILABLE_MESSAGE),
    }
}

/// Inbound chat event handler
pub struct ChatBridge {
    orchestrator: Arc<DispatchOrchestrator>,
    buttons: Vec<MoodButton>,
}

impl ChatBridge {
    pub fn new(orchestrator: Arc<DispatchOrchestrator>, buttons: Vec<MoodButton>) -> Self {
        Self { orchestrator, buttons }
    }

    pub fn buttons(&self) -> &[MoodButton] {
        &self.buttons
    }

    pub fn orchestrator(&self) -> &DispatchOrchestrator {
        &self.orchestrator
    }

    /// A mood button was pressed; `selection` is a button id or a mood name
    pub async fn on_mood_button(&self, selection: &str, chat_id: i64, user: &str) -> Delivery {
        let Some(mood) = resolve_selection(&self.buttons, selection) else {
            debug!(chat_id, selection = %selection, "Unknown mood selection");
            return Delivery::notice(chat_id, UNKNOWN_MOOD_MESSAGE);
        };

        let result = self.orchestrator.handle_mood_selection(mood, user).await;
        delivery_for(chat_id, &result)
    }

    /// A photo was uploaded
    ///
    /// The image is spooled to a temporary file for the detectors; the file is
    /// removed when this call returns.
    pub async fn on_photo(&self, image: Vec<u8>, chat_id: i64, user: &str) -> Delivery {
        if image.is_empty() {
            return Delivery::notice(chat_id, EMPTY_PHOTO_MESSAGE);
        }

        let spooled = tokio::task::spawn_blocking(move || spool_photo(&image)).await;
        let file = match spooled {
            Ok(Ok(file)) => file,
            Ok(Err(e)) => {
                warn!(chat_id, error = %e, "Failed to spool photo");
                return Delivery::notice(chat_id, PHOTO_FAILED_MESSAGE);
            }
            Err(e) => {
                warn!(chat_id, error = %e, "Photo spooling task failed");
                return Delivery::notice(chat_id, PHOTO_FAILED_MESSAGE);
            }
        };

        let photo = self
            .orchestrator
            .handle_photo_selection(file.path(), user)
            .await;
        delivery_for(chat_id, &photo.result)
    }
}

fn spool_photo(image: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("moodcast-photo-")
        .suffix(".jpg")
        .tempfile()?;
    file.write_all(image)?;
    file.flush()?;
    Ok(file)
}
