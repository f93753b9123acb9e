use std::fmt::Display;

use itertools::Itertools;

use super::attributes::{AccessQuery, RequestType};
use super::verdict::Mismatch;

impl Display for AccessQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<(&str, String)> = Vec::new();
        match &self.request {
            RequestType::Resource(r) => {
                fields.push(("namespace", r.namespace.clone()));
                fields.push(("verb", r.verb.clone()));
                fields.push(("group", r.api_group.clone()));
                fields.push(("resource", r.resource.clone()));
                fields.push(("subresource", r.subresource.clone()));
                fields.push(("name", r.name.clone()));
            }
            RequestType::NonResource(r) => {
                fields.push(("path", r.path.clone()));
                fields.push(("verb", r.verb.clone()));
            }
        }
        fields.push(("user", self.subject.user.clone()));
        if !self.subject.groups.is_empty() {
            fields.push(("groups", format!("[{}]", self.subject.groups.join(", "))));
        }
        // Unset attributes only add noise to a long failure list.
        let rendered = fields
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{key}={value}"))
            .join(" ");
        f.write_str(&rendered)
    }
}

impl Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} => allowed={} denied={}",
            self.query,
            self.verdict.allowed(),
            self.verdict.denied()
        )?;
        if !self.verdict.reason.is_empty() {
            write!(f, " reason={:?}", self.verdict.reason.to_string())?;
        }
        if let Some(error) = &self.verdict.evaluation_error {
            write!(f, " evaluationError={error:?}")?;
        }
        Ok(())
    }
}
