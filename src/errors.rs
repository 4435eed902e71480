/// Errors that indicate a credential or quota problem rather than a bad
/// request. Retrying these without operator action is pointless, so the
/// orchestrator aborts the run instead of sanitizing and retrying.
pub fn is_auth_error(message: &str) -> bool {
    const MARKERS: [&str; 6] = [
        "API_KEY_MISSING",
        "401",
        "403",
        "429",
        "RESOURCE_EXHAUSTED",
        "quota",
    ];
    MARKERS.iter().any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_markers_detected() {
        assert!(is_auth_error("API_KEY_MISSING: no generation api_key configured"));
        assert!(is_auth_error("Gemini API error (401): unauthorized"));
        assert!(is_auth_error("Gemini API error (403): forbidden"));
        assert!(is_auth_error("Gemini API error (429): too many requests"));
        assert!(is_auth_error("RESOURCE_EXHAUSTED"));
        assert!(is_auth_error("You exceeded your current quota"));
    }

    #[test]
    fn test_ordinary_errors_pass_through() {
        assert!(!is_auth_error("Gemini response empty. Finish reason: SAFETY"));
        assert!(!is_auth_error("Failed to parse generation response: not json"));
        assert!(!is_auth_error("connection reset by peer"));
    }
}
