//! Per-chat encounter state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use encounter_domain::{ChatId, EncounterSession};
use tokio::sync::RwLock;

/// The live encounter of one chat plus its in-flight generation flag.
pub struct EncounterContext {
    chat_id: ChatId,
    session: RwLock<EncounterSession>,
    generating: AtomicBool,
}

impl EncounterContext {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            session: RwLock::new(EncounterSession::new(chat_id.clone())),
            chat_id,
            generating: AtomicBool::new(false),
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn session(&self) -> &RwLock<EncounterSession> {
        &self.session
    }

    /// Claim the generation slot, or `None` if a request is already in flight.
    pub fn try_begin_generation(&self) -> Option<GenerationGuard<'_>> {
        self.generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GenerationGuard {
                flag: &self.generating,
            })
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }
}

/// Releases the generation slot when dropped.
pub struct GenerationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One [`EncounterContext`] per chat, created on first use.
#[derive(Default)]
pub struct EncounterContexts {
    contexts: RwLock<HashMap<ChatId, Arc<EncounterContext>>>,
}

impl EncounterContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, chat_id: &ChatId) -> Option<Arc<EncounterContext>> {
        self.contexts.read().await.get(chat_id).cloned()
    }

    pub async fn get_or_create(&self, chat_id: &ChatId) -> Arc<EncounterContext> {
        if let Some(context) = self.get(chat_id).await {
            return context;
        }
        self.contexts
            .write()
            .await
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(EncounterContext::new(chat_id.clone())))
            .clone()
    }

    /// Drop the context of a chat that went away.
    pub async fn remove(&self, chat_id: &ChatId) -> Option<Arc<EncounterContext>> {
        self.contexts.write().await.remove(chat_id)
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }
}
