use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Textual attributes of the current subject. Filled by image analysis or
/// edited by hand; the facial description stays out of this record by
/// contract (likeness comes from reference images, never from text).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age_estimate: String,
    /// Broad archetype or profession anchor, e.g. "young woman, commercial
    /// model aesthetic".
    #[serde(default)]
    pub archetype: String,
    /// Realism tags in identity mode, free-form backstory otherwise.
    #[serde(default)]
    pub backstory: String,
    /// High-density body morphology description (the "loud body" half of
    /// the identity contract).
    #[serde(default)]
    pub body_description: String,
}

/// Snapshot taken whenever a fresh subject analysis completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub identity: IdentityProfile,
    pub physical_profile: String,
}

impl HistoryEntry {
    pub fn new(identity: IdentityProfile, physical_profile: String) -> Self {
        Self {
            id: random_token(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            identity,
            physical_profile,
        }
    }
}

pub const HISTORY_CAP: usize = 10;

/// Inserts newest-first and evicts beyond [`HISTORY_CAP`].
pub fn push_history(history: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    history.insert(0, entry);
    history.truncate(HISTORY_CAP);
}

/// 9-char alphanumeric token, the id format used throughout the session.
pub fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect()
}
