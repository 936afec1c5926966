//! Similarity-based repetition detection
//!
//! Two thresholds, two moments:
//! - `detect_history_loop` (0.70) runs BEFORE invoking the model and compares
//!   the last two persisted assistant turns. Cheap drift detection: a loop in
//!   progress means the model call is wasted spend.
//! - `detect_loop` (0.95) runs AFTER generation, before dispatch, and
//!   compares the fresh candidate against the last three persisted assistant
//!   turns. The near-1.0 threshold avoids false positives on legitimately
//!   similar short prompts.

use admissions_agent_core::Turn;

/// Pre-model threshold over the last two persisted assistant turns.
pub const HISTORY_THRESHOLD: f64 = 0.70;

/// Post-model threshold for a candidate against recent assistant turns.
pub const PROACTIVE_THRESHOLD: f64 = 0.95;

/// Ratcliff–Obershelp similarity over the raw character sequences:
/// `2 * matches / (len(a) + len(b))`, matches summed over the longest common
/// substring and, recursively, the pieces on either side of it.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (a_start, b_start, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..a_start], &b[..b_start])
        + matching_chars(&a[a_start + len..], &b[b_start + len..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut curr = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let len = prev[j] + 1;
                curr[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = curr;
    }
    best
}

fn assistant_contents(history: &[Turn]) -> Vec<&str> {
    history
        .iter()
        .filter(|t| t.is_assistant())
        .map(|t| t.content.as_str())
        .collect()
}

/// Are the last two persisted assistant turns already repetitive?
pub fn detect_history_loop(history: &[Turn]) -> bool {
    let assistant = assistant_contents(history);
    if assistant.len() < 2 {
        return false;
    }

    let recent = assistant[assistant.len() - 1].to_lowercase();
    let previous = assistant[assistant.len() - 2].to_lowercase();
    let ratio = similarity_ratio(&recent, &previous);
    tracing::info!(ratio = %format!("{ratio:.2}"), threshold = HISTORY_THRESHOLD, "Loop history check");

    if ratio > HISTORY_THRESHOLD {
        tracing::warn!(recent = %crate::sanitize::preview(&recent, 40), "Loop detected in history");
        return true;
    }
    false
}

/// Would sending this candidate repeat one of the last three assistant turns?
pub fn detect_loop(history: &[Turn], candidate: &str) -> bool {
    if history.is_empty() || candidate.is_empty() {
        return false;
    }

    let assistant = assistant_contents(history);
    let candidate_lower = candidate.to_lowercase();

    for past in assistant.iter().rev().take(3) {
        let ratio = similarity_ratio(&candidate_lower, &past.to_lowercase());
        if ratio > PROACTIVE_THRESHOLD {
            tracing::warn!(
                ratio = %format!("{ratio:.2}"),
                candidate = %crate::sanitize::preview(candidate, 40),
                "Proactive loop detected"
            );
            return true;
        }
    }
    false
}
