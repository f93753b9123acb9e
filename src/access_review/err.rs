#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("failed to create SubjectAccessReview: {0}")]
    Transport(#[from] kube::Error),
    #[error("SubjectAccessReview for {0} came back without a status")]
    MissingStatus(String),
    #[error("review run was cancelled after {0} submissions")]
    Cancelled(usize),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid resource '{0}': {1}")]
    InvalidResource(String, String),
    #[error("invalid test case: {0}")]
    MixedRequestKinds(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TestCaseError {
    #[error("failed to expand test case: {0}")]
    Expansion(#[from] ParseError),
    #[error("failed to review test case: {0}")]
    Review(#[from] ReviewError),
}
