use std::fmt;

use crate::protocol::Protocol;

// maintain lifecycle of a job
#[derive(Debug)]
pub struct Job<P: Protocol> {
    // as handed out by the delegator
    id: P::JobId,

    stage: P::Stage,
}

impl<P: Protocol> Job<P> {
    pub fn new(id: P::JobId) -> Self {
        Self {
            id,
            stage: P::SUBMITTED,
        }
    }

    pub fn id(&self) -> &P::JobId {
        &self.id
    }

    pub fn stage(&self) -> P::Stage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == P::FINISHED
    }

    /// Moves forward to `stage`; anything not strictly ahead is a no-op.
    pub fn advance(&mut self, stage: P::Stage) -> bool {
        if stage <= self.stage {
            return false
        }
        self.stage = stage;
        true
    }

    pub fn progress(&self) -> Progress {
        Progress {
            job: self.id.to_string(),
            stage: self.stage.to_string(),
            step: self.stage.into(),
            steps: P::FINISHED.into(),
        }
    }
}

/// Snapshot of where the active job stands, for whoever draws it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub job: String,
    pub stage: String,

    // 0 when just submitted, `steps` when finished
    pub step: u8,
    pub steps: u8,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] job `{}`: {}", self.step, self.steps, self.job, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        Delegation, DelegationStage, JobKey,
    };

    const STAGES: [DelegationStage; 5] = [
        DelegationStage::Submitted,
        DelegationStage::Propagated,
        DelegationStage::BidReceived,
        DelegationStage::Delegated,
        DelegationStage::Finished,
    ];

    fn job() -> Job<Delegation> {
        Job::new(serde_json::from_str::<JobKey>("\"job-1\"").unwrap())
    }

    #[test]
    fn stage_is_the_maximum_seen() {
        // every delivery order of four events, duplicates included
        for n in 0..STAGES.len().pow(4) {
            let mut job = job();
            let mut max = DelegationStage::Submitted;
            let mut rest = n;
            for _ in 0..4 {
                let stage = STAGES[rest % STAGES.len()];
                rest /= STAGES.len();
                let before = job.stage();
                let moved = job.advance(stage);
                max = max.max(stage);
                assert!(job.stage() >= before);
                assert_eq!(job.stage(), max);
                assert_eq!(moved, stage > before);
            }
        }
    }

    #[test]
    fn progress_counts_steps() {
        let mut job = job();
        job.advance(DelegationStage::BidReceived);
        let progress = job.progress();
        assert_eq!((progress.step, progress.steps), (2, 4));
        assert_eq!(progress.to_string(), "[2/4] job `job-1`: job bidding");
        assert!(false == job.is_finished());
    }
}
