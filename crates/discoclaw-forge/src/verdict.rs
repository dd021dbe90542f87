//! Parses an auditor round's free-form markdown for concern severities and
//! the closing verdict line (spec.md §4.6 step 5).

use std::sync::OnceLock;

use regex::Regex;

/// Ordering `Blocking > Medium > Minor > Suggestion`, matching spec.md's
/// "maximum severity seen" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Suggestion,
    Minor,
    Medium,
    Blocking,
}

impl Severity {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" => Some(Severity::Blocking),
            "medium" => Some(Severity::Medium),
            "minor" => Some(Severity::Minor),
            "suggestion" => Some(Severity::Suggestion),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Blocking => "blocking",
            Severity::Medium => "medium",
            Severity::Minor => "minor",
            Severity::Suggestion => "suggestion",
        }
    }
}

fn severity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*Severity:\s*(blocking|medium|minor|suggestion)\*\*").unwrap())
}

/// Every severity tag found in the auditor's text, in document order.
pub fn severities(text: &str) -> Vec<Severity> {
    severity_regex()
        .captures_iter(text)
        .filter_map(|c| Severity::parse(&c[1]))
        .collect()
}

/// Highest severity present, if any.
pub fn max_severity(text: &str) -> Option<Severity> {
    severities(text).into_iter().max()
}

/// Whether the text's closing line reads "Needs revision." rather than
/// "Ready to approve.".
pub fn verdict_says_needs_revision(text: &str) -> bool {
    text.contains("**Verdict:**") && text.contains("Needs revision")
}

/// `should_loop = true` iff the verdict text says "Needs revision" OR any
/// blocking severity is present.
pub fn should_loop(text: &str) -> bool {
    verdict_says_needs_revision(text) || max_severity(text) == Some(Severity::Blocking)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_all_severities_in_order() {
        let text = "**Concern 1:** foo **Severity: minor**\n**Concern 2:** bar **Severity: blocking**\n";
        assert_eq!(severities(text), vec![Severity::Minor, Severity::Blocking]);
        assert_eq!(max_severity(text), Some(Severity::Blocking));
    }

    #[test]
    fn blocking_forces_loop_even_with_ready_verdict() {
        let text = "**Concern 1:** foo **Severity: blocking**\n**Verdict:** Ready to approve.\n";
        assert!(should_loop(text));
    }

    #[test]
    fn needs_revision_forces_loop_with_no_severities() {
        let text = "**Verdict:** Needs revision.\n";
        assert!(should_loop(text));
        assert_eq!(max_severity(text), None);
    }

    #[test]
    fn clean_approval_does_not_loop() {
        let text = "**Concern 1:** foo **Severity: suggestion**\n**Verdict:** Ready to approve.\n";
        assert!(!should_loop(text));
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Blocking > Severity::Medium);
        assert!(Severity::Medium > Severity::Minor);
        assert!(Severity::Minor > Severity::Suggestion);
    }
}
