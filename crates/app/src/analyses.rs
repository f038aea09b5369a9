//! Which analyses a complete component result is expected to contain.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct AnalysisExpectations {
    common: BTreeSet<String>,
    ecosystem_specific: BTreeMap<String, BTreeSet<String>>,
    unreliable: BTreeSet<String>,
}

/// Result of comparing observed analyses against the expected set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisDiff {
    pub missing: BTreeSet<String>,
    pub unexpected: BTreeSet<String>,
}

impl AnalysisDiff {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

fn labels(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Default for AnalysisExpectations {
    fn default() -> Self {
        // static_analysis, binary_data, languages and crypto_algorithms workers are disabled
        // by default and therefore not expected.
        let common = labels(&[
            "metadata",
            "source_licenses",
            "digests",
            "redhat_downstream",
            "dependency_snapshot",
            "code_metrics",
        ]);
        let ecosystem_specific = BTreeMap::from([
            ("maven".to_string(), labels(&["blackduck"])),
            ("npm".to_string(), labels(&["blackduck"])),
        ]);
        let unreliable = labels(&["blackduck", "github_details", "security_issues"]);
        Self {
            common,
            ecosystem_specific,
            unreliable,
        }
    }
}

impl AnalysisExpectations {
    pub fn new(
        common: BTreeSet<String>,
        ecosystem_specific: BTreeMap<String, BTreeSet<String>>,
        unreliable: BTreeSet<String>,
    ) -> Self {
        Self {
            common,
            ecosystem_specific,
            unreliable,
        }
    }

    pub fn expected_for(&self, ecosystem: &str) -> BTreeSet<String> {
        let mut expected = self.common.clone();
        if let Some(specific) = self.ecosystem_specific.get(ecosystem) {
            expected.extend(specific.iter().cloned());
        }
        expected
    }

    /// Missing and unexpected analyses, ignoring the unreliable ones on both sides.
    pub fn compare(&self, actual: &BTreeSet<String>, expected: &BTreeSet<String>) -> AnalysisDiff {
        let missing = expected
            .difference(actual)
            .filter(|name| !self.unreliable.contains(*name))
            .cloned()
            .collect();
        let unexpected = actual
            .difference(expected)
            .filter(|name| !self.unreliable.contains(*name))
            .cloned()
            .collect();
        AnalysisDiff {
            missing,
            unexpected,
        }
    }

    pub fn unreliable(&self) -> &BTreeSet<String> {
        &self.unreliable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecosystem_additions_are_unioned() {
        let expectations = AnalysisExpectations::default();
        let maven = expectations.expected_for("maven");
        assert!(maven.contains("blackduck"));
        assert!(maven.contains("metadata"));
        assert_eq!(maven.len(), 7);
        assert_eq!(expectations.expected_for("pypi").len(), 6);
    }

    #[test]
    fn unreliable_analyses_never_count() {
        let expectations = AnalysisExpectations::default();
        let expected = expectations.expected_for("npm");
        let mut actual = labels(&[
            "metadata",
            "source_licenses",
            "digests",
            "redhat_downstream",
            "dependency_snapshot",
            "github_details",
            "security_issues",
            "languages",
        ]);
        let diff = expectations.compare(&actual, &expected);
        assert_eq!(diff.missing, labels(&["code_metrics"]));
        assert_eq!(diff.unexpected, labels(&["languages"]));
        assert!(!diff.is_complete());

        actual.insert("code_metrics".into());
        actual.remove("languages");
        assert!(expectations.compare(&actual, &expected).is_complete());
    }

    #[test]
    fn custom_expectations_replace_defaults() {
        let expectations = AnalysisExpectations::new(
            labels(&["metadata"]),
            BTreeMap::from([("pypi".to_string(), labels(&["security_issues"]))]),
            labels(&["security_issues"]),
        );
        let expected = expectations.expected_for("pypi");
        assert_eq!(expected, labels(&["metadata", "security_issues"]));
        assert_eq!(expectations.unreliable(), &labels(&["security_issues"]));
        assert!(
            expectations
                .compare(&labels(&["metadata"]), &expected)
                .is_complete()
        );
        assert!(
            AnalysisExpectations::default()
                .unreliable()
                .contains("github_details")
        );
    }
}
