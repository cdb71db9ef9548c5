//! Request sanitisation before a [`crate::SummaryRequest`] is forwarded to a
//! remote provider.

use crate::{SummaryRequest, MAX_FACT_SUMMARIES};
use gh_status_core::error::GhStatusError;

/// Strips control characters from free-form text and caps the number of
/// fact summaries forwarded to a remote provider, so that upstream event
/// data (commit messages, issue titles) cannot smuggle prompt-injection
/// payloads or blow past token limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestSanitizer;

impl RequestSanitizer {
    /// Sanitise a request in place, returning an error if nothing usable remains.
    pub fn sanitize(&self, request: &mut SummaryRequest) -> Result<(), GhStatusError> {
        request.fact_summaries.truncate(MAX_FACT_SUMMARIES);
        for summary in &mut request.fact_summaries {
            *summary = strip_control_characters(summary);
        }
        for narrative in &mut request.prior_narratives {
            *narrative = strip_control_characters(narrative);
        }
        if request.fact_summaries.is_empty() {
            return Err(GhStatusError::EvidenceEmpty);
        }
        Ok(())
    }
}

fn strip_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters_but_keeps_newlines() {
        let cleaned = strip_control_characters("hello\u{0007}\nworld");
        assert_eq!(cleaned, "hello\nworld");
    }

    #[test]
    fn truncates_to_the_fact_summary_cap() {
        let mut request = SummaryRequest {
            repository_slug: "acme/widgets".to_string(),
            window_start: chrono::Utc::now(),
            window_end: chrono::Utc::now(),
            fact_summaries: vec!["fact".to_string(); MAX_FACT_SUMMARIES + 50],
            work_type_counts: Default::default(),
            prior_narratives: vec![],
        };
        RequestSanitizer.sanitize(&mut request).unwrap();
        assert_eq!(request.fact_summaries.len(), MAX_FACT_SUMMARIES);
    }
}
