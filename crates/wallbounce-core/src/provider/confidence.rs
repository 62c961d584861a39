//! Default confidence heuristic for backends that report none.
//!
//! The heuristic is pure and bounded: a base of 0.3, up to 0.4 for
//! content length (saturating at 800 characters), and up to 0.3 for
//! token diversity (unique tokens over total tokens). The result never
//! exceeds 0.95 so a derived confidence can always be beaten by a
//! backend that actually reports one.

/// Characters at which the length component saturates.
const LENGTH_SATURATION: f64 = 800.0;

/// Compute the default confidence for `content`.
///
/// Deterministic, and always in `[0.0, 0.95]`. Empty content scores 0.
pub fn default_confidence(content: &str) -> f64 {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let length_component = 0.4 * (trimmed.len() as f64 / LENGTH_SATURATION).min(1.0);

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let unique: std::collections::HashSet<&str> = tokens.iter().copied().collect();
    let diversity_component = if tokens.is_empty() {
        0.0
    } else {
        0.3 * (unique.len() as f64 / tokens.len() as f64)
    };

    (0.3 + length_component + diversity_component).clamp(0.0, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_scores_zero() {
        assert_eq!(default_confidence(""), 0.0);
        assert_eq!(default_confidence("   \n"), 0.0);
    }

    #[test]
    fn deterministic() {
        let content = "The same text scores the same every time.";
        assert_eq!(default_confidence(content), default_confidence(content));
    }

    #[test]
    fn bounded_by_cap() {
        let long: String = (0..2000).map(|n| format!("word{n} ")).collect();
        let score = default_confidence(&long);
        assert!(score <= 0.95);
        assert!(score > 0.9);
    }

    #[test]
    fn longer_diverse_content_scores_higher() {
        let short = default_confidence("ok");
        let long = default_confidence(
            "A substantially longer answer covering several aspects of the \
             question with varied vocabulary and concrete detail throughout.",
        );
        assert!(long > short);
    }

    #[test]
    fn repetition_lowers_the_diversity_component() {
        let repeated = default_confidence("spam spam spam spam spam spam spam spam");
        let varied = default_confidence("eight distinct words appear within this answer text");
        assert!(varied > repeated);
    }
}
