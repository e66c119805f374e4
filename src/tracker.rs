use std::fmt;

use serde_json::Value;
use tokio::sync::watch;
use log::{debug, error, info, warn};
use verifier::{
    CapabilityKey, Executor, ProofHeader, UnsupportedCapability, Verification,
};

use crate::{
    api::Delegate,
    error::TrackError,
    job::{Job, Progress},
    protocol::{Protocol, Signal},
    subscribe::{Subscription, SubscriptionHandle},
};

/// What a single event did to the active job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<S> {
    Advanced(S),

    // duplicate or out of order, the job stays where it was
    Ignored(S),

    Finished(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Verified {
        key: CapabilityKey,
        program_hash: String,
        program_output: String,
    },

    VerificationFailed(String),

    // finished, but no verifier fits the proof
    Unverified(UnsupportedCapability),

    // events stopped before the job finished
    Stalled,

    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Verified { key, program_hash, program_output } => write!(
                f,
                "proof verified with `{key}`, program hash: `{program_hash}`, program output: `{program_output}`"
            ),

            Outcome::VerificationFailed(reason) => write!(f, "verification failed: {reason}"),

            Outcome::Unverified(reason) => write!(f, "proof left unverified: {reason}"),

            Outcome::Stalled => f.write_str("event stream stopped before the job finished"),

            Outcome::Cancelled => f.write_str("tracking was cancelled"),
        }
    }
}

/// How tracking of one job ended.
#[derive(Debug)]
pub struct Report<P: Protocol> {
    pub job: P::JobId,
    pub stage: P::Stage,
    pub artifact: Option<Vec<u8>>,
    pub outcome: Outcome,
}

/// Follows one job at a time from submission to a verified proof.
pub struct Tracker<P: Protocol> {
    executor: Executor,
    strict: bool,
    job: Option<Job<P>>,
    subscription: Option<Subscription>,
    progress: watch::Sender<Option<Progress>>,
}

impl<P: Protocol> Tracker<P> {
    pub fn new(executor: Executor) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            executor,
            strict: false,
            job: None,
            subscription: None,
            progress,
        }
    }

    // id mismatches abort tracking
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn job(&self) -> Option<&Job<P>> {
        self.job.as_ref()
    }

    pub fn progress(&self) -> watch::Receiver<Option<Progress>> {
        self.progress.subscribe()
    }

    pub fn subscription_handle(&self) -> Option<SubscriptionHandle> {
        self.subscription.as_ref().map(Subscription::handle)
    }

    /// Forgets the active job, closing its subscription first.
    pub fn reset(&mut self) {
        self.release();
        if let Some(job) = self.job.take() {
            debug!("Stopped tracking job `{}` at `{}`", job.id(), job.stage());
        }
        self.progress.send_replace(None);
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
    }

    /// Delegates a PIE and makes the resulting job the active one.
    pub async fn submit<D>(
        &mut self,
        delegator: &D,
        pie: Vec<u8>,
    ) -> Result<P::JobId, TrackError>
    where
        D: Delegate<P> + ?Sized,
    {
        self.reset();
        match delegator.delegate(pie).await {
            Ok(id) => {
                info!("Job `{id}` was sent to the delegator.");
                self.track(id.clone());
                Ok(id)
            },

            Err(e) => {
                warn!("Job was not created: `{e}`");
                Err(e)
            },
        }
    }

    /// Starts following an already submitted job.
    pub fn track(&mut self, id: P::JobId) {
        self.reset();
        let job = Job::new(id);
        self.progress.send_replace(Some(job.progress()));
        self.job = Some(job);
    }

    /// Feeds the active job from `subscription`, replacing any previous one.
    pub fn attach(&mut self, subscription: Subscription) {
        if let Some(previous) = self.subscription.replace(subscription) {
            previous.close();
        }
    }

    /// Classifies one raw event and applies it to the active job.
    pub fn apply(&mut self, event: Value) -> Result<Step<P::Stage>, TrackError> {
        let job = self.job.as_mut().ok_or(TrackError::NoActiveJob)?;
        if job.is_finished() {
            debug!("Job `{}` is finished, event is dropped.", job.id());
            return Ok(Step::Ignored(job.stage()))
        }
        let tag = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("untagged")
            .to_string();
        let event: P::Event = serde_json::from_value(event)
            .map_err(|e| TrackError::MalformedEvent { tag, reason: e.to_string() })?;
        let signal = P::classify(event);
        if let Some(token) = signal.correlation() {
            if token != job.id() {
                return Err(TrackError::IdentityMismatch {
                    expected: job.id().to_string(),
                    got: token.to_string(),
                })
            }
        }
        match signal {
            Signal::Stage { stage, peer, .. } => {
                if false == job.advance(stage) {
                    info!(
                        "Ignored `{stage}` for job `{}`, it is already at `{}`",
                        job.id(),
                        job.stage()
                    );
                    return Ok(Step::Ignored(job.stage()))
                }
                match peer {
                    Some(peer) => info!("Job `{}`: {stage}, peer `{peer}`", job.id()),

                    None => info!("Job `{}`: {stage}", job.id()),
                }
                self.progress.send_replace(Some(job.progress()));
                Ok(Step::Advanced(stage))
            },

            Signal::Finished { artifact, .. } => {
                job.advance(P::FINISHED);
                info!("Job `{}`: proof received, `{}` bytes", job.id(), artifact.len());
                self.progress.send_replace(Some(job.progress()));
                if let Some(subscription) = &self.subscription {
                    subscription.close();
                }
                Ok(Step::Finished(artifact))
            },
        }
    }

    /// Consumes events until the job finishes or they stop coming.
    pub async fn run(&mut self) -> Result<Report<P>, TrackError> {
        if self.job.is_none() {
            return Err(TrackError::NoActiveJob)
        }
        loop {
            let event = match self.subscription.as_mut() {
                Some(subscription) => subscription.next().await,

                None => None,
            };
            let Some(event) = event else {
                return self.stopped()
            };
            match self.apply(event) {
                Ok(Step::Finished(artifact)) => return self.finish(artifact).await,

                Ok(_) => {},

                Err(e @ TrackError::IdentityMismatch { .. }) if self.strict => {
                    error!("Tracking is aborted: `{e}`");
                    self.reset();
                    return Err(e)
                },

                Err(e) => warn!("Dropped an event: `{e}`"),
            }
        }
    }

    fn stopped(&mut self) -> Result<Report<P>, TrackError> {
        let cancelled = self.subscription
            .as_ref()
            .map_or(false, Subscription::is_closed);
        let job = self.job.take().ok_or(TrackError::NoActiveJob)?;
        self.reset();
        let outcome = if cancelled { Outcome::Cancelled } else { Outcome::Stalled };
        warn!("Job `{}` stopped at `{}`: {outcome}", job.id(), job.stage());
        Ok(Report {
            job: job.id().clone(),
            stage: job.stage(),
            artifact: None,
            outcome,
        })
    }

    async fn finish(&mut self, artifact: Vec<u8>) -> Result<Report<P>, TrackError> {
        let job = self.job.take().ok_or(TrackError::NoActiveJob)?;
        // the finished stage stays published
        self.release();
        let outcome = verify_artifact(&self.executor, &artifact).await;
        info!("Job `{}`: {outcome}", job.id());
        Ok(Report {
            job: job.id().clone(),
            stage: job.stage(),
            artifact: Some(artifact),
            outcome,
        })
    }
}

/// Routes a proof to the verifier its own header asks for.
pub async fn verify_artifact(
    executor: &Executor,
    artifact: &[u8],
) -> Outcome {
    let key = match ProofHeader::parse(artifact)
        .map_err(|e| UnsupportedCapability::Unreadable(e.to_string()))
        .and_then(|header| header.capability_key())
    {
        Ok(k) => k,

        Err(e) => {
            warn!("Verification is skipped: `{e}`");
            return Outcome::Unverified(e)
        },
    };
    // header parsing already proved it is utf-8
    let proof = String::from_utf8_lossy(artifact).into_owned();
    match executor.verify(key, proof).await {
        Ok(Verification::Verified { program_hash, program_output }) => Outcome::Verified {
            key,
            program_hash,
            program_output,
        },

        Ok(Verification::Failed(reason)) => Outcome::VerificationFailed(reason),

        Err(e) => Outcome::Unverified(e),
    }
}
