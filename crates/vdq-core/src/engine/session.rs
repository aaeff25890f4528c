//! Pending format selections, one per conversation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::format::{FormatHandle, FormatOption};
use crate::gateway::ConversationKey;
use crate::media::MediaSource;

#[derive(Debug, Clone)]
pub struct Selection {
    pub source: MediaSource,
    pub options: Vec<FormatOption>,
    pub created_at: Instant,
}

#[derive(Default)]
pub struct SelectionSessions {
    sessions: Mutex<HashMap<ConversationKey, Selection>>,
}

impl SelectionSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationKey, Selection>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the options offered to `key`, replacing any earlier selection.
    pub fn insert(&self, key: ConversationKey, source: MediaSource, options: Vec<FormatOption>) {
        self.lock().insert(
            key,
            Selection {
                source,
                options,
                created_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, key: ConversationKey) -> Option<Selection> {
        self.lock().get(&key).cloned()
    }

    /// Returns whether a selection existed.
    pub fn remove(&self, key: ConversationKey) -> bool {
        self.lock().remove(&key).is_some()
    }

    /// Consume the selection if `handle` is one of its options. A handle that
    /// does not belong to the list leaves the selection in place.
    pub fn take_choice(
        &self,
        key: ConversationKey,
        handle: &FormatHandle,
    ) -> Option<(MediaSource, FormatOption)> {
        let mut sessions = self.lock();
        let option = sessions
            .get(&key)?
            .options
            .iter()
            .find(|o| &o.handle == handle)?
            .clone();
        let selection = sessions.remove(&key)?;
        Some((selection.source, option))
    }

    /// Drop selections older than `max_age`. Returns how many expired.
    pub fn expire(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.created_at) < max_age);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
