use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    /// The payload does not match what its tag promises.
    #[error("malformed `{tag}` event: {reason}")]
    MalformedEvent { tag: String, reason: String },

    /// The event names a job other than the one being tracked.
    #[error("event for job `{got}` does not belong to the active job `{expected}`")]
    IdentityMismatch { expected: String, got: String },

    #[error("no job is being tracked")]
    NoActiveJob,

    /// The delegator refused the job or answered with garbage.
    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}
