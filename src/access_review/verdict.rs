use std::fmt::Display;

use k8s_openapi::api::authorization::v1::SubjectAccessReviewStatus;

use super::attributes::AccessQuery;
use super::err::ReviewError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    // Neither allowed nor explicitly denied, e.g. no RBAC rule matched.
    NoOpinion,
}

impl Decision {
    /// Fail-closed: only an explicit allow counts as allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Decision::Allow => "allowed",
            Decision::Deny => "denied",
            Decision::NoOpinion => "no opinion",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reason(Option<String>);

impl Reason {
    pub fn is_empty(&self) -> bool {
        self.0.as_deref().unwrap_or_default().is_empty()
    }
    pub fn with_cause(self, cause: Reason) -> Self {
        match (&self.0, &cause.0) {
            (Some(reason), Some(cause)) => format!("{reason}: {cause}").into(),
            (None, _) => cause,
            (_, None) => self,
        }
    }
}

impl From<String> for Reason {
    fn from(value: String) -> Self {
        Self(Some(value))
    }
}

impl From<Option<String>> for Reason {
    fn from(value: Option<String>) -> Self {
        Self(value.filter(|v| !v.is_empty()))
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or_default())
    }
}

/// The answer of the authorization service to one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: Reason,
    pub evaluation_error: Option<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: Reason::default(),
            evaluation_error: None,
        }
    }
    pub fn deny() -> Self {
        Self {
            decision: Decision::Deny,
            reason: Reason::default(),
            evaluation_error: None,
        }
    }
    pub fn no_opinion() -> Self {
        Self {
            decision: Decision::NoOpinion,
            reason: Reason::default(),
            evaluation_error: None,
        }
    }
    pub fn with_reason(self, reason: impl Into<Reason>) -> Self {
        Self {
            reason: reason.into(),
            ..self
        }
    }

    pub fn allowed(&self) -> bool {
        self.decision == Decision::Allow
    }

    pub fn denied(&self) -> bool {
        self.decision == Decision::Deny
    }
}

impl TryFrom<SubjectAccessReviewStatus> for Verdict {
    type Error = ReviewError;
    fn try_from(status: SubjectAccessReviewStatus) -> Result<Self, Self::Error> {
        let decision = match (status.allowed, status.denied.unwrap_or(false)) {
            (true, true) => {
                return Err(ReviewError::InvalidResponse(
                    "status is both allowed and denied".to_string(),
                ))
            }
            (true, false) => Decision::Allow,
            (false, true) => Decision::Deny,
            (false, false) => Decision::NoOpinion,
        };
        Ok(Self {
            decision,
            reason: status.reason.into(),
            evaluation_error: status.evaluation_error.filter(|e| !e.is_empty()),
        })
    }
}

/// The outcome every query of a test case is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    Allow,
    Deny,
}

impl Expectation {
    /// Deny is met by both an explicit denial and no opinion.
    pub fn is_met_by(&self, verdict: &Verdict) -> bool {
        match self {
            Expectation::Allow => verdict.decision.is_allowed(),
            Expectation::Deny => !verdict.decision.is_allowed(),
        }
    }
}

impl From<bool> for Expectation {
    fn from(allow: bool) -> Self {
        if allow {
            Expectation::Allow
        } else {
            Expectation::Deny
        }
    }
}

impl Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Expectation::Allow => "allow",
            Expectation::Deny => "deny",
        })
    }
}

/// A query whose verdict did not meet the expectation of its test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub query: AccessQuery,
    pub verdict: Verdict,
}

/// Checks every verdict against `expected`. Every pair is looked at, so the
/// result lists all mismatches, not just the first one.
pub fn evaluate<'a>(
    results: impl IntoIterator<Item = (&'a AccessQuery, &'a Verdict)>,
    expected: Expectation,
) -> (usize, Vec<Mismatch>) {
    let mut evaluated = 0;
    let mut mismatches = Vec::new();
    for (query, verdict) in results {
        evaluated += 1;
        if !expected.is_met_by(verdict) {
            mismatches.push(Mismatch {
                query: query.clone(),
                verdict: verdict.clone(),
            });
        }
    }
    (evaluated, mismatches)
}

/// The implicit verdict of a whole test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub decision: Decision,
    pub reasons: Vec<Reason>,
}

/// Folds verdicts into one: allowed only if every verdict is allowed. Any
/// denial or no-opinion flips the aggregate to denied and contributes its reason.
pub fn aggregate<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Aggregate {
    let mut decision = Decision::Allow;
    let mut reasons = Vec::new();
    for verdict in verdicts {
        if verdict.decision.is_allowed() {
            continue;
        }
        decision = Decision::Deny;
        let reason = Reason::from(format!("{}", verdict.decision)).with_cause(verdict.reason.clone());
        reasons.push(reason);
    }
    Aggregate { decision, reasons }
}
