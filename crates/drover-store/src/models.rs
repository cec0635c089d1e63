//! Core data types persisted by the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Category of a feature checklist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Functional,
    Style,
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Functional => "functional",
            Self::Style => "style",
        };
        f.write_str(s)
    }
}

impl FromStr for FeatureCategory {
    type Err = FeatureCategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "functional" => Ok(Self::Functional),
            "style" => Ok(Self::Style),
            other => Err(FeatureCategoryParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`FeatureCategory`] string.
#[derive(Debug, Clone)]
pub struct FeatureCategoryParseError(pub String);

impl fmt::Display for FeatureCategoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid feature category: {:?}", self.0)
    }
}

impl std::error::Error for FeatureCategoryParseError {}

// ---------------------------------------------------------------------------
// Feature entries
// ---------------------------------------------------------------------------

/// One entry of the feature checklist.
///
/// Identity (`category`, `description`, `steps`) is immutable once the
/// entry is created; only `passes` may change, and only from `false`
/// to `true`. The store enforces this -- see
/// [`crate::FeatureList::merge_assertions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureEntry {
    /// Whether this is a functional or a style requirement.
    pub category: FeatureCategory,
    /// What the feature is.
    pub description: String,
    /// Ordered verification steps a session should follow.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Whether the feature has been verified as working.
    #[serde(default)]
    pub passes: bool,
}

impl FeatureEntry {
    /// Create a new, unstarted entry.
    pub fn new(
        category: FeatureCategory,
        description: impl Into<String>,
        steps: Vec<String>,
    ) -> Self {
        Self {
            category,
            description: description.into(),
            steps,
            passes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrips_through_display_and_fromstr() {
        for cat in [FeatureCategory::Functional, FeatureCategory::Style] {
            let parsed: FeatureCategory = cat.to_string().parse().unwrap();
            assert_eq!(parsed, cat);
        }
    }

    #[test]
    fn category_rejects_unknown() {
        assert!("cosmetic".parse::<FeatureCategory>().is_err());
    }

    #[test]
    fn entry_deserializes_with_defaults() {
        let json = r#"{"category":"functional","description":"login works"}"#;
        let entry: FeatureEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.passes);
        assert!(entry.steps.is_empty());
    }

    #[test]
    fn entry_serde_uses_snake_case_category() {
        let entry = FeatureEntry::new(FeatureCategory::Style, "dark mode", vec![]);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""category":"style""#));
    }
}
