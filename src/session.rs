use crate::directive::{UgcAesthetic, WardrobePolicy};
use crate::identity::{push_history, HistoryEntry, IdentityProfile};
use crate::manifest::TaskType;
use crate::persist::KeyValueStore;
use crate::reconcile::{PromptItem, ReconcileOutcome};
use crate::repetition::RepetitionTracker;
use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage key for the autosaved draft.
pub const DRAFT_KEY: &str = "musaic_draft_state";
pub const MIN_TARGET: usize = 10;
pub const MAX_TARGET: usize = 100;
/// Storage key for the subject analysis history.
pub const HISTORY_KEY: &str = "visionstruct_influencers";

/// Everything a session needs to resume mid-run: task selection, subject,
/// accumulated prompts, and the anti-repetition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub task_type: TaskType,
    #[serde(default)]
    pub wardrobe: WardrobePolicy,
    #[serde(default)]
    pub aesthetic: Option<UgcAesthetic>,
    pub target_total: usize,
    #[serde(default)]
    pub profile: IdentityProfile,
    #[serde(default)]
    pub prompts: Vec<PromptItem>,
    #[serde(default)]
    pub generated_count: usize,
    #[serde(default)]
    pub repetition: RepetitionTracker,
}

impl SessionState {
    fn fresh(target_total: usize) -> Self {
        Self {
            task_type: TaskType::Lora,
            wardrobe: WardrobePolicy::default(),
            aesthetic: None,
            target_total,
            profile: IdentityProfile::default(),
            prompts: Vec::new(),
            generated_count: 0,
            repetition: RepetitionTracker::new(),
        }
    }
}

/// A running session over an injected store. Mutations autosave the draft so
/// an interrupted run resumes where it stopped.
pub struct Session {
    store: Arc<dyn KeyValueStore>,
    default_target: usize,
    pub state: SessionState,
}

impl Session {
    pub fn new(store: Arc<dyn KeyValueStore>, default_target: usize) -> Self {
        Self {
            store,
            default_target,
            state: SessionState::fresh(default_target),
        }
    }

    /// Restores the autosaved draft if one exists. A draft that fails to
    /// parse is discarded rather than blocking the session.
    pub async fn resume(store: Arc<dyn KeyValueStore>, default_target: usize) -> Result<Self> {
        let state = match store.get(DRAFT_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Discarding unreadable draft state: {}", e);
                    SessionState::fresh(default_target)
                }
            },
            None => SessionState::fresh(default_target),
        };
        Ok(Self {
            store,
            default_target,
            state,
        })
    }

    pub async fn save_draft(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.state)?;
        self.store.set(DRAFT_KEY, &raw).await
    }

    pub async fn clear_draft(&self) -> Result<()> {
        self.store.remove(DRAFT_KEY).await
    }

    /// Switches the batch mode. Prompts and the repetition log survive the
    /// switch; only an explicit reset clears them.
    pub fn set_task_type(&mut self, task_type: TaskType) {
        self.state.task_type = task_type;
        if task_type != TaskType::Ugc {
            self.state.aesthetic = None;
        }
    }

    /// Sets the dataset target, clamped to the supported range.
    pub fn set_target_total(&mut self, target: usize) {
        self.state.target_total = target.clamp(MIN_TARGET, MAX_TARGET);
    }

    /// Clears generated output and the repetition log. With `keep_subject`
    /// the analyzed profile and target stay; without it the session returns
    /// to its initial state.
    pub async fn reset(&mut self, keep_subject: bool) -> Result<()> {
        self.state.prompts.clear();
        self.state.generated_count = 0;
        self.state.repetition.clear();
        if !keep_subject {
            self.state.profile = IdentityProfile::default();
            self.state.target_total = self.default_target;
            self.clear_draft().await?;
            return Ok(());
        }
        self.save_draft().await
    }

    /// Folds one reconciled batch into the session.
    pub fn absorb(&mut self, outcome: ReconcileOutcome) {
        self.state.generated_count += outcome.items.len();
        self.state.prompts.extend(outcome.items);
        self.state.repetition.record(outcome.settings);
    }

    pub fn remaining(&self) -> usize {
        self.state
            .target_total
            .saturating_sub(self.state.generated_count)
    }

    /// Edits a prompt in place, keeping its structured wrapper when the
    /// payload parses. Returns false when the id is unknown.
    pub fn update_prompt(&mut self, id: &str, new_text: &str) -> bool {
        match self.state.prompts.iter_mut().find(|p| p.id == id) {
            Some(item) => {
                item.apply_edit(new_text);
                true
            }
            None => false,
        }
    }

    pub fn toggle_copied(&mut self, id: &str) -> bool {
        match self.state.prompts.iter_mut().find(|p| p.id == id) {
            Some(item) => {
                item.is_copied = !item.is_copied;
                true
            }
            None => false,
        }
    }

    pub async fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        match self.store.get(HISTORY_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(history) => Ok(history),
                Err(e) => {
                    warn!("Discarding unreadable history: {}", e);
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    /// Appends a snapshot newest-first, keeping the capped window.
    pub async fn record_history(&self, entry: HistoryEntry) -> Result<()> {
        let mut history = self.load_history().await?;
        push_history(&mut history, entry);
        let raw = serde_json::to_string(&history)?;
        self.store.set(HISTORY_KEY, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::generate_manifest;
    use crate::persist::MemoryStore;
    use crate::reconcile::reconcile;
    use serde_json::json;

    fn store() -> Arc<dyn KeyValueStore> {
        Arc::new(MemoryStore::new())
    }

    fn outcome_of(count: usize) -> ReconcileOutcome {
        let manifest = generate_manifest(TaskType::Lora, 50, 0, count);
        let items: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                json!({
                    "generation_data": { "final_prompt_string": format!("p{}", i) },
                    "background": { "setting": format!("setting {}", i) }
                })
            })
            .collect();
        reconcile(&items, &manifest)
    }

    #[tokio::test]
    async fn test_draft_roundtrip() -> Result<()> {
        let store = store();
        let mut session = Session::new(store.clone(), 50);
        session.state.task_type = TaskType::Ugc;
        session.state.aesthetic = Some(UgcAesthetic::Polished);
        session.absorb(outcome_of(3));
        session.save_draft().await?;

        let resumed = Session::resume(store, 50).await?;
        assert_eq!(resumed.state.task_type, TaskType::Ugc);
        assert_eq!(resumed.state.generated_count, 3);
        assert_eq!(resumed.state.prompts.len(), 3);
        assert_eq!(resumed.state.repetition.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_draft_is_discarded() -> Result<()> {
        let store = store();
        store.set(DRAFT_KEY, "{ not valid json").await?;
        let session = Session::resume(store, 40).await?;
        assert_eq!(session.state.target_total, 40);
        assert!(session.state.prompts.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_task_switch_keeps_repetition_log() -> Result<()> {
        let mut session = Session::new(store(), 50);
        session.absorb(outcome_of(2));
        session.state.aesthetic = Some(UgcAesthetic::Candid);
        session.set_task_type(TaskType::Product);

        assert_eq!(session.state.repetition.len(), 2);
        assert_eq!(session.state.prompts.len(), 2);
        assert_eq!(session.state.aesthetic, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_keep_subject() -> Result<()> {
        let mut session = Session::new(store(), 50);
        session.state.profile.name = "Ava".to_string();
        session.state.target_total = 80;
        session.absorb(outcome_of(5));

        session.reset(true).await?;
        assert!(session.state.prompts.is_empty());
        assert_eq!(session.state.generated_count, 0);
        assert!(session.state.repetition.is_empty());
        assert_eq!(session.state.profile.name, "Ava");
        assert_eq!(session.state.target_total, 80);
        Ok(())
    }

    #[tokio::test]
    async fn test_full_reset_clears_subject_and_draft() -> Result<()> {
        let store = store();
        let mut session = Session::new(store.clone(), 50);
        session.state.profile.name = "Ava".to_string();
        session.state.target_total = 80;
        session.absorb(outcome_of(5));
        session.save_draft().await?;

        session.reset(false).await?;
        assert_eq!(session.state.profile, IdentityProfile::default());
        assert_eq!(session.state.target_total, 50);
        assert_eq!(store.get(DRAFT_KEY).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_prompt_editing_and_copy_toggle() -> Result<()> {
        let mut session = Session::new(store(), 50);
        session.absorb(outcome_of(1));
        let id = session.state.prompts[0].id.clone();

        assert!(session.update_prompt(&id, "edited"));
        assert_eq!(session.state.prompts[0].compiled_string(), "edited");
        // Structured wrapper survives the edit.
        let value: serde_json::Value =
            serde_json::from_str(&session.state.prompts[0].text).unwrap();
        assert!(value.get("generation_data").is_some());

        assert!(session.toggle_copied(&id));
        assert!(session.state.prompts[0].is_copied);
        assert!(session.toggle_copied(&id));
        assert!(!session.state.prompts[0].is_copied);

        assert!(!session.update_prompt("missing-id", "x"));
        assert!(!session.toggle_copied("missing-id"));
        Ok(())
    }

    #[tokio::test]
    async fn test_history_is_persisted_and_capped() -> Result<()> {
        let store = store();
        let session = Session::new(store.clone(), 50);
        for i in 0..12 {
            let profile = IdentityProfile {
                name: format!("subject-{}", i),
                ..Default::default()
            };
            session
                .record_history(HistoryEntry::new(profile, String::new()))
                .await?;
        }

        let history = session.load_history().await?;
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].identity.name, "subject-11");

        // A second session over the same store sees the same history.
        let other = Session::new(store, 50);
        assert_eq!(other.load_history().await?.len(), 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_target_is_clamped() -> Result<()> {
        let mut session = Session::new(store(), 50);
        session.set_target_total(5);
        assert_eq!(session.state.target_total, MIN_TARGET);
        session.set_target_total(500);
        assert_eq!(session.state.target_total, MAX_TARGET);
        session.set_target_total(60);
        assert_eq!(session.state.target_total, 60);
        Ok(())
    }

    #[tokio::test]
    async fn test_remaining() -> Result<()> {
        let mut session = Session::new(store(), 50);
        assert_eq!(session.remaining(), 50);
        session.absorb(outcome_of(8));
        assert_eq!(session.remaining(), 42);
        session.state.generated_count = 60;
        assert_eq!(session.remaining(), 0);
        Ok(())
    }
}
