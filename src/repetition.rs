use serde::{Deserialize, Serialize};

/// Append-only log of scene/setting descriptors used by earlier batches.
///
/// The log grows for the whole session; only a truncated trailing window is
/// ever embedded into a directive. Entries are advisory context for the
/// generator, so duplicates are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepetitionTracker {
    settings: Vec<String>,
}

impl RepetitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<I, S>(&mut self, settings: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.extend(settings.into_iter().map(Into::into));
    }

    /// Most recent `max_items` entries, each truncated to at most
    /// `max_chars_per_item` characters.
    pub fn window(&self, max_items: usize, max_chars_per_item: usize) -> Vec<String> {
        let start = self.settings.len().saturating_sub(max_items);
        self.settings[start..]
            .iter()
            .map(|s| s.chars().take(max_chars_per_item).collect())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    pub fn clear(&mut self) {
        self.settings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_limits_count_and_length() {
        let mut tracker = RepetitionTracker::new();
        tracker.record((0..40).map(|i| format!("setting number {} with a fairly long tail", i)));

        let window = tracker.window(25, 20);
        assert_eq!(window.len(), 25);
        assert!(window.iter().all(|s| s.chars().count() <= 20));
        // Trailing slice: the last recorded entry is the last window entry.
        assert!(window.last().unwrap().starts_with("setting number 39"));
        assert!(window.first().unwrap().starts_with("setting number 15"));
    }

    #[test]
    fn test_window_smaller_than_limit() {
        let mut tracker = RepetitionTracker::new();
        tracker.record(["beach", "rooftop bar"]);
        assert_eq!(tracker.window(25, 60), vec!["beach", "rooftop bar"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut tracker = RepetitionTracker::new();
        tracker.record(["cafe", "cafe"]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let mut tracker = RepetitionTracker::new();
        tracker.record(["咖啡廳的窗邊座位，午後陽光"]);
        let window = tracker.window(10, 5);
        assert_eq!(window[0], "咖啡廳的窗");
    }

    #[test]
    fn test_clear() {
        let mut tracker = RepetitionTracker::new();
        tracker.record(["park"]);
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.window(10, 10).is_empty());
    }
}
