use std::future::Future;

use k8s_openapi::api::authorization::v1::{
    NonResourceAttributes, ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use kube::api::PostParams;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::attributes::{AccessQuery, RequestType};
use super::err::ReviewError;
use super::verdict::Verdict;
use crate::util::non_empty;

pub trait AccessReviewer {
    /// Asks the authorization service for a verdict on one query.
    /// Transport and API failures are returned as errors, never folded into a verdict.
    fn review(&self, query: &AccessQuery) -> impl Future<Output = Result<Verdict, ReviewError>> + Send;
}

/// Reviews queries by creating SubjectAccessReviews against the cluster.
/// The reviews are not persisted by the API server, so nothing needs cleaning up.
pub struct KubeAccessReviewer {
    api: kube::Api<SubjectAccessReview>,
}

impl KubeAccessReviewer {
    pub fn new(client: kube::Client) -> Self {
        Self {
            api: kube::Api::all(client),
        }
    }
}

impl AccessReviewer for KubeAccessReviewer {
    async fn review(&self, query: &AccessQuery) -> Result<Verdict, ReviewError> {
        let review = self
            .api
            .create(&PostParams::default(), &query.into())
            .await?;
        let status = review
            .status
            .ok_or_else(|| ReviewError::MissingStatus(query.to_string()))?;
        status.try_into()
    }
}

impl From<&AccessQuery> for SubjectAccessReview {
    fn from(query: &AccessQuery) -> Self {
        let (resource_attributes, non_resource_attributes) = match &query.request {
            RequestType::Resource(r) => (
                Some(ResourceAttributes {
                    namespace: non_empty(&r.namespace),
                    verb: non_empty(&r.verb),
                    group: non_empty(&r.api_group),
                    resource: non_empty(&r.resource),
                    subresource: non_empty(&r.subresource),
                    name: non_empty(&r.name),
                    ..Default::default()
                }),
                None,
            ),
            RequestType::NonResource(r) => (
                None,
                Some(NonResourceAttributes {
                    path: non_empty(&r.path),
                    verb: non_empty(&r.verb),
                }),
            ),
        };
        SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: non_empty(&query.subject.user),
                groups: (!query.subject.groups.is_empty()).then(|| query.subject.groups.clone()),
                resource_attributes,
                non_resource_attributes,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Submits `queries` one at a time and returns their verdicts, index-aligned.
///
/// The first failed submission aborts the run. Cancellation is checked before
/// each submission; verdicts gathered so far are dropped in both cases.
#[instrument(skip_all, fields(queries = queries.len()))]
pub async fn submit<R: AccessReviewer>(
    reviewer: &R,
    queries: &[AccessQuery],
    cancel: &CancellationToken,
) -> Result<Vec<Verdict>, ReviewError> {
    let mut verdicts = Vec::with_capacity(queries.len());
    for query in queries {
        if cancel.is_cancelled() {
            return Err(ReviewError::Cancelled(verdicts.len()));
        }
        let verdict = reviewer.review(query).await?;
        debug!(%query, decision = %verdict.decision, "reviewed");
        verdicts.push(verdict);
    }
    Ok(verdicts)
}
