use std::fmt::Display;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::access_review::{
    self, AccessReviewer, Decision, Expectation, Mismatch, Reason, TestCaseError,
};

/// The declarative description of a set of authorization queries.
///
/// Every list is one dimension of the query matrix; an empty list leaves the
/// dimension unset instead of removing every query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TestCaseData {
    pub namespaces: Vec<String>,
    pub names: Vec<String>,
    pub verbs: Vec<String>,
    pub api_groups: Vec<String>,
    // "resource", "group/resource" or "group/resource/subresource".
    pub resources: Vec<String>,
    pub subresources: Vec<String>,
    pub non_resource_verbs: Vec<String>,
    pub non_resource_paths: Vec<String>,
    pub users: Vec<String>,
    // Each entry is the complete group membership of one probed subject.
    pub groups: Vec<Vec<String>>,
}

impl TestCaseData {
    pub fn is_non_resource(&self) -> bool {
        !self.non_resource_paths.is_empty() || !self.non_resource_verbs.is_empty()
    }

    pub fn has_resource_dimensions(&self) -> bool {
        [
            &self.namespaces,
            &self.names,
            &self.verbs,
            &self.api_groups,
            &self.resources,
            &self.subresources,
        ]
        .iter()
        .any(|dimension| !dimension.is_empty())
    }

    pub fn with_users(mut self, users: &[&str]) -> Self {
        self.users = crate::util::strings(users);
        self
    }

    pub fn with_groups(mut self, groups: &[&[&str]]) -> Self {
        self.groups = groups.iter().map(|set| crate::util::strings(set)).collect();
        self
    }

    pub fn with_group_sets(mut self, groups: Vec<Vec<String>>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_namespaces(mut self, namespaces: &[&str]) -> Self {
        self.namespaces = crate::util::strings(namespaces);
        self
    }

    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.names = crate::util::strings(names);
        self
    }

    pub fn with_verbs(mut self, verbs: &[&str]) -> Self {
        self.verbs = crate::util::strings(verbs);
        self
    }

    pub fn with_api_groups(mut self, api_groups: &[&str]) -> Self {
        self.api_groups = crate::util::strings(api_groups);
        self
    }

    pub fn with_resources(mut self, resources: &[&str]) -> Self {
        self.resources = crate::util::strings(resources);
        self
    }

    pub fn with_non_resource(mut self, paths: &[&str], verbs: &[&str]) -> Self {
        self.non_resource_paths = crate::util::strings(paths);
        self.non_resource_verbs = crate::util::strings(verbs);
        self
    }
}

/// The result of the last run of a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseOutput {
    // Every query met the expectation.
    pub passed: bool,
    pub expected: Expectation,
    // Allowed only if every query was explicitly allowed.
    pub decision: Decision,
    pub reasons: Vec<Reason>,
    pub evaluated: usize,
    pub mismatches: Vec<Mismatch>,
}

impl Default for TestCaseOutput {
    fn default() -> Self {
        Self {
            passed: false,
            expected: Expectation::Deny,
            decision: Decision::NoOpinion,
            reasons: Vec::new(),
            evaluated: 0,
            mismatches: Vec::new(),
        }
    }
}

impl Display for TestCaseOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expected {}: {} of {} queries did not match",
            self.expected,
            self.mismatches.len(),
            self.evaluated
        )?;
        for mismatch in &self.mismatches {
            write!(f, "\n  {mismatch}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestCase {
    pub data: TestCaseData,
    pub output: TestCaseOutput,
}

impl TestCase {
    pub fn new(data: TestCaseData) -> Self {
        Self {
            data,
            output: TestCaseOutput::default(),
        }
    }

    /// Expands the test case, reviews every query and records the outcome in `output`.
    ///
    /// `output` is reset first, and left reset if expansion or review fails.
    #[instrument(skip_all, fields(expected = %expected))]
    pub async fn run<R: AccessReviewer>(
        &mut self,
        reviewer: &R,
        expected: Expectation,
        cancel: &CancellationToken,
    ) -> Result<(), TestCaseError> {
        self.output = TestCaseOutput::default();

        let queries = access_review::expand(&self.data)?;
        let verdicts = access_review::submit(reviewer, &queries, cancel).await?;

        let (evaluated, mismatches) =
            access_review::evaluate(queries.iter().zip(verdicts.iter()), expected);
        let aggregate = access_review::aggregate(&verdicts);
        debug!(
            evaluated,
            mismatches = mismatches.len(),
            decision = %aggregate.decision,
            "evaluated test case"
        );

        self.output = TestCaseOutput {
            passed: mismatches.is_empty(),
            expected,
            decision: aggregate.decision,
            reasons: aggregate.reasons,
            evaluated,
            mismatches,
        };
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::access_review::test_utils::StaticReviewer;
    use crate::access_review::{RequestType, ReviewError, Verdict};

    fn read_only_secrets() -> TestCaseData {
        TestCaseData::default()
            .with_users(&["test-user"])
            .with_groups(&[&["ReadOnly"]])
            .with_resources(&["secrets"])
            .with_namespaces(&["default", "kube-system"])
            .with_verbs(&["get", "list", "watch", "create"])
    }

    #[tokio::test]
    async fn test_read_only_denied_secrets() {
        let reviewer = StaticReviewer::deny_all();
        let mut tc = TestCase::new(read_only_secrets());
        tc.run(&reviewer, false.into(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(tc.output.passed, "{}", tc.output);
        assert_eq!(tc.output.evaluated, 8);
        assert_eq!(reviewer.calls(), 8);
        assert!(tc.output.mismatches.is_empty());
        assert_eq!(tc.output.decision, Decision::Deny);
    }

    #[tokio::test]
    async fn test_allow_expectation_fails_closed() {
        // Anything but an explicit allow is reported.
        let reviewer = StaticReviewer::new(|query| match &query.request {
            RequestType::Resource(r) if r.verb == "watch" => Ok(Verdict::no_opinion()),
            _ => Ok(Verdict::allow()),
        });
        let mut tc = TestCase::new(read_only_secrets());
        tc.run(&reviewer, Expectation::Allow, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!tc.output.passed);
        assert_eq!(tc.output.mismatches.len(), 2);
        assert_eq!(tc.output.decision, Decision::Deny);
        assert_eq!(tc.output.reasons.len(), 2);
        let report = tc.output.to_string();
        assert!(report.starts_with("expected allow: 2 of 8 queries did not match"));
        assert!(report.contains(
            "namespace=default verb=watch resource=secrets user=test-user groups=[ReadOnly] => allowed=false denied=false"
        ));
        assert!(report.contains("namespace=kube-system verb=watch"));
    }

    #[tokio::test]
    async fn test_single_mismatch_among_three() {
        let reviewer = StaticReviewer::new(|query| match &query.request {
            RequestType::Resource(r) if r.namespace == "a" => Ok(Verdict::allow()),
            _ => Ok(Verdict::deny()),
        });
        let mut tc = TestCase::new(
            TestCaseData::default()
                .with_namespaces(&["a", "b", "c"])
                .with_resources(&["pods"])
                .with_verbs(&["delete"]),
        );
        tc.run(&reviewer, Expectation::Deny, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reviewer.calls(), 3);
        assert_eq!(tc.output.evaluated, 3);
        assert_eq!(tc.output.mismatches.len(), 1);
        match &tc.output.mismatches[0].query.request {
            RequestType::Resource(r) => assert_eq!(r.namespace, "a"),
            RequestType::NonResource(_) => panic!("unexpected non-resource request"),
        }
    }

    #[tokio::test]
    async fn test_output_is_reset_on_error() {
        let mut tc = TestCase::new(read_only_secrets());
        tc.run(&StaticReviewer::allow_all(), Expectation::Allow, &CancellationToken::new())
            .await
            .unwrap();
        assert!(tc.output.passed);

        let failing = StaticReviewer::new(|query| Err(ReviewError::MissingStatus(query.to_string())));
        let result = tc
            .run(&failing, Expectation::Allow, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TestCaseError::Review(_))));
        assert_eq!(tc.output, TestCaseOutput::default());
        assert!(!tc.output.passed);
    }

    #[test]
    fn test_deserialize_data() {
        let data: TestCaseData = serde_json::from_str(
            r#"{
                "users": ["test-user"],
                "groups": [["CollaboratorManual", "Manual"], ["Emergency"]],
                "apiGroups": ["apps"],
                "resources": ["daemonsets"],
                "verbs": ["update"]
            }"#,
        )
        .unwrap();
        assert_eq!(
            data,
            TestCaseData::default()
                .with_users(&["test-user"])
                .with_groups(&[&["CollaboratorManual", "Manual"], &["Emergency"]])
                .with_resources(&["daemonsets"])
                .with_verbs(&["update"])
                .with_api_groups(&["apps"])
        );
    }
}
