//! Static reminder copy.
//!
//! A small rotating pool per stage, so daily notifications do not read
//! identically. Real deployments swap this for a server-driven catalog;
//! the pipeline only sees the [`MessageCatalog`] trait.

use rand::prelude::*;
use serde_json::json;
use tsuzuri_core::{MessageCatalog, ReminderStage, RenderedMessage};

const MAIN_LINES: &[(&str, &str)] = &[
    ("Time to write", "A few lines are enough. What happened today?"),
    (
        "Your journal is waiting",
        "Capture one moment from today before it fades.",
    ),
    ("Today's page is blank", "Keep the thread going with one small entry."),
];

const FOLLOW_UP_LINES: &[(&str, &str)] = &[
    ("Still time today", "The day is not over yet. A sentence counts."),
    ("A gentle nudge", "Your streak grows with a single entry."),
    ("Before the day closes", "Two minutes of writing is all it takes."),
];

#[derive(Default)]
pub struct StaticCatalog;

impl StaticCatalog {
    pub fn new() -> Self {
        Self
    }
}

impl MessageCatalog for StaticCatalog {
    fn render(&self, stage: ReminderStage) -> RenderedMessage {
        let pool = match stage {
            ReminderStage::Main => MAIN_LINES,
            ReminderStage::FollowUp(_) => FOLLOW_UP_LINES,
        };
        let mut rng = rand::thread_rng();
        let (title, body) = pool.choose(&mut rng).copied().unwrap_or(pool[0]);
        let mut message = RenderedMessage::new(title, body);
        message.data = json!({ "stage": stage.to_string() });
        message
    }
}
