//! Ordered, append-only record of spoken turns.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 256;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// Position in the session, starting at 0
    pub order: u64,
}

/// Shared handle to a session transcript.
///
/// Clones observe the same entries. Appending never fails and never waits on readers:
/// subscribers that fall behind lose the oldest notifications but `entries()` always
/// has the full record.
#[derive(Clone)]
pub struct TranscriptAccumulator {
    entries: Arc<RwLock<Vec<TranscriptEntry>>>,
    notify: broadcast::Sender<TranscriptEntry>,
}

impl Default for TranscriptAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            notify,
        }
    }

    pub fn append(&self, speaker: Speaker, text: impl Into<String>) -> TranscriptEntry {
        let entry = {
            let mut entries = self.entries.write();
            let entry = TranscriptEntry {
                speaker,
                text: text.into(),
                order: entries.len() as u64,
            };
            entries.push(entry.clone());
            entry
        };
        // No receivers is fine
        let _ = self.notify.send(entry.clone());
        entry
    }

    /// Chronological snapshot.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Receive entries as they are appended.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.notify.subscribe()
    }
}

impl fmt::Debug for TranscriptAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptAccumulator")
            .field("len", &self.len())
            .finish()
    }
}
