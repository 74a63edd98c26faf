//! Defines the `Rule` struct used for bracketed substitutions.

use serde::Serialize;

/// A paired start/end substitution.
///
/// A span that opens with `original_start` and closes with `original_end` is
/// rendered as `translation_start`, the converted inner text, then
/// `translation_end`. Rules are identified by `(original_start, original_end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Rule {
    pub original_start: String,
    pub original_end: String,
    pub translation_start: String,
    pub translation_end: String,
}

impl Rule {
    pub fn new(
        original_start: impl Into<String>,
        original_end: impl Into<String>,
        translation_start: impl Into<String>,
        translation_end: impl Into<String>,
    ) -> Self {
        Self {
            original_start: original_start.into(),
            original_end: original_end.into(),
            translation_start: translation_start.into(),
            translation_end: translation_end.into(),
        }
    }

    /// A rule needs both boundary tokens to be matchable.
    pub fn is_well_formed(&self) -> bool {
        !self.original_start.is_empty() && !self.original_end.is_empty()
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.original_start, &self.original_end)
    }

    /// Parses a `start=end=translation_start=translation_end` line.
    ///
    /// The translation fields may be empty, the original fields may not.
    pub fn from_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(4, '=');
        let rule = Rule::new(parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        rule.is_well_formed().then_some(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_fields() {
        let rule = Rule::from_line("在=上=on =").unwrap();
        assert_eq!(rule.key(), ("在", "上"));
        assert_eq!(rule.translation_start, "on ");
        assert_eq!(rule.translation_end, "");
    }

    #[test]
    fn rejects_missing_fields_and_empty_originals() {
        assert!(Rule::from_line("在=上=on").is_none());
        assert!(Rule::from_line("=上=a=b").is_none());
        assert!(Rule::from_line("在==a=b").is_none());
    }
}
