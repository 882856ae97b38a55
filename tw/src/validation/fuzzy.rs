//! Composite fuzzy matching for tool and parameter names
//!
//! Scoring over lowercased candidates: exact match short-circuits to 1.0;
//! otherwise substring containment, normalized Levenshtein distance, and a
//! shared-prefix bonus combine into a score clamped to 1.0. Corrections are
//! applied automatically only at or above the configured threshold.

/// Default auto-correction threshold; override via
/// `VALIDATION_SIMILARITY_THRESHOLD`.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Similarity between two names in `[0.0, 1.0]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;

    // Containment: a candidate that contains the query is a stronger signal
    // than the query containing the candidate
    if b.contains(&a) {
        score += 0.8;
    } else if a.contains(&b) {
        score += 0.7;
    }

    let distance = levenshtein(&a, &b) as f64;
    let max_len = a.len().max(b.len()) as f64;
    score += (1.0 - distance / max_len) * 0.5;

    if common_prefix_len(&a, &b) >= 3 {
        score += 0.3;
    }

    score.min(1.0)
}

/// Pick the best-scoring candidate, with its score.
pub fn best_match<'a, I>(query: &str, candidates: I) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|candidate| (candidate, similarity(query, candidate)))
        .max_by(|(_, x), (_, y)| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal))
}

/// Best match at or above `threshold`, if any.
pub fn best_match_above<'a, I>(query: &str, candidates: I, threshold: f64) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    best_match(query, candidates).filter(|(_, score)| *score >= threshold)
}

/// Classic dynamic-programming Levenshtein distance.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_is_one() {
        assert_eq!(similarity("navigate", "navigate"), 1.0);
        assert_eq!(similarity("Navigate", "navigate"), 1.0);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(similarity("", "navigate"), 0.0);
        assert_eq!(similarity("navigate", ""), 0.0);
    }

    #[test]
    fn test_containment_scores_high() {
        // "navigate" is contained in "browser_navigate"
        let score = similarity("navigate", "browser_navigate");
        assert!(score >= 0.8, "containment should clear the threshold, got {score}");
    }

    #[test]
    fn test_catalog_correction_clears_threshold() {
        // The catalog has browser_navigate; the planner said navigate.
        // Matching happens on short names with the server prefix stripped.
        let score = similarity("navigate", "browser_navigate");
        assert!(
            score >= DEFAULT_SIMILARITY_THRESHOLD,
            "expected auto-correctable similarity, got {score}"
        );
    }

    #[test]
    fn test_unrelated_names_score_low() {
        let score = similarity("click", "read_file");
        assert!(score < 0.5, "unrelated names scored {score}");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
    }

    #[test]
    fn test_best_match_picks_highest() {
        let candidates = ["browser_click", "browser_navigate", "read_file"];
        let (name, score) = best_match("navigate", candidates).unwrap();
        assert_eq!(name, "browser_navigate");
        assert!(score > similarity("navigate", "browser_click"));
    }

    #[test]
    fn test_best_match_above_threshold_filters() {
        let candidates = ["completely_different"];
        assert!(best_match_above("click", candidates, 0.8).is_none());
        let candidates = ["clicker"];
        assert!(best_match_above("click", candidates, 0.8).is_some());
    }

    #[test]
    fn test_score_clamped() {
        // Shared prefix + containment + high Levenshtein similarity would
        // exceed 1.0 unclamped
        let score = similarity("browser_nav", "browser_navigate");
        assert!(score <= 1.0);
    }
}
