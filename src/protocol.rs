//! Wire vocabularies of the delegator revisions.
//!
//! Each revision fixes the job identity token, the ordered stages a job goes
//! through and the events that announce them. The tracker only ever talks to
//! a revision through [`Protocol`].

use std::{
    fmt,
    hash::Hash,
};

use num_enum::IntoPrimitive;
use serde::{
    de::DeserializeOwned,
    Serialize, Deserialize,
};
use serde_json::Value;
use anyhow;

pub trait Protocol: Send + Sync + 'static {
    type JobId: Clone + Eq + Hash + fmt::Display + fmt::Debug
        + Serialize + DeserializeOwned + Send + Sync + 'static;

    type Stage: Copy + Ord + fmt::Display + fmt::Debug + Into<u8>
        + Send + Sync + 'static;

    type Event: DeserializeOwned + fmt::Debug + Send + 'static;

    const NAME: &'static str;

    // field of the delegate response holding the job identity
    const ID_FIELD: &'static str;

    // query parameter naming the job on the event endpoints
    const ID_QUERY: &'static str;

    const SUBMITTED: Self::Stage;

    const FINISHED: Self::Stage;

    fn classify(event: Self::Event) -> Signal<Self::JobId, Self::Stage>;

    /// Reads a job identity typed on the command line.
    fn parse_id(s: &str) -> anyhow::Result<Self::JobId> {
        serde_json::from_str(s)
            .or_else(|_| serde_json::from_value(Value::String(s.to_string())))
            .map_err(|e| anyhow::anyhow!("`{s}` is not a {} job identity: {e}", Self::NAME))
    }
}

/// What an event means for the job it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<Id, S> {
    Stage {
        stage: S,
        correlation: Option<Id>,
        peer: Option<PeerId>,
    },

    Finished {
        artifact: Vec<u8>,
        correlation: Option<Id>,
    },
}

impl<Id, S> Signal<Id, S> {
    pub fn correlation(&self) -> Option<&Id> {
        match self {
            Signal::Stage { correlation, .. } => correlation.as_ref(),

            Signal::Finished { correlation, .. } => correlation.as_ref(),
        }
    }
}

/// Identity of a network peer, as announced by the delegator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl TryFrom<String> for PeerId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.trim().is_empty() {
            return Err(String::from("peer id cannot be empty"));
        }
        Ok(PeerId(s))
    }
}

impl From<PeerId> for String {
    fn from(p: PeerId) -> Self {
        p.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job identity handed out by the delegator: a hex string or a plain number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawKey", into = "String")]
pub struct JobKey(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
    Text(String),
    Number(u64),
}

impl TryFrom<RawKey> for JobKey {
    type Error = String;

    fn try_from(raw: RawKey) -> Result<Self, Self::Error> {
        match raw {
            RawKey::Text(s) if s.trim().is_empty() => Err(String::from("job key cannot be empty")),

            RawKey::Text(s) => Ok(JobKey(s)),

            RawKey::Number(n) => Ok(JobKey(n.to_string())),
        }
    }
}

impl From<JobKey> for String {
    fn from(k: JobKey) -> Self {
        k.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// current revision: bidding and delegation are announced
#[derive(Debug, Clone, Copy)]
pub struct Delegation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive)]
#[repr(u8)]
pub enum DelegationStage {
    Submitted,
    Propagated,
    BidReceived,
    Delegated,
    Finished,
}

impl fmt::Display for DelegationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DelegationStage::Submitted => "job sent",
            DelegationStage::Propagated => "job propagated",
            DelegationStage::BidReceived => "job bidding",
            DelegationStage::Delegated => "job delegated",
            DelegationStage::Finished => "proof received",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DelegationEvent {
    Submitted,

    // reached the DHT and gossip topics
    Propagated,

    BidReceived(PeerId),

    Delegated(PeerId),

    // the proof, as json bytes
    Finished(Vec<u8>),
}

impl Protocol for Delegation {
    type JobId = JobKey;
    type Stage = DelegationStage;
    type Event = DelegationEvent;

    const NAME: &'static str = "delegation";
    const ID_FIELD: &'static str = "job_key";
    const ID_QUERY: &'static str = "job_key";
    const SUBMITTED: DelegationStage = DelegationStage::Submitted;
    const FINISHED: DelegationStage = DelegationStage::Finished;

    fn classify(event: DelegationEvent) -> Signal<JobKey, DelegationStage> {
        let stage = |stage, peer| Signal::Stage { stage, correlation: None, peer };
        match event {
            DelegationEvent::Submitted => stage(DelegationStage::Submitted, None),

            DelegationEvent::Propagated => stage(DelegationStage::Propagated, None),

            DelegationEvent::BidReceived(peer) => stage(DelegationStage::BidReceived, Some(peer)),

            DelegationEvent::Delegated(peer) => stage(DelegationStage::Delegated, Some(peer)),

            DelegationEvent::Finished(artifact) => Signal::Finished { artifact, correlation: None },
        }
    }
}

// first revision: numeric job hash, a job is either picked or done
#[derive(Debug, Clone, Copy)]
pub struct Legacy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive)]
#[repr(u8)]
pub enum LegacyStage {
    Submitted,
    Picked,
    Finished,
}

impl fmt::Display for LegacyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LegacyStage::Submitted => "job sent",
            LegacyStage::Picked => "job picked",
            LegacyStage::Finished => "proof received",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LegacyEvent {
    // carries the hash of the picked job
    Picked(u64),

    Witness(Vec<u8>),
}

impl Protocol for Legacy {
    type JobId = u64;
    type Stage = LegacyStage;
    type Event = LegacyEvent;

    const NAME: &'static str = "legacy";
    const ID_FIELD: &'static str = "job_hash";
    const ID_QUERY: &'static str = "job_hash";
    const SUBMITTED: LegacyStage = LegacyStage::Submitted;
    const FINISHED: LegacyStage = LegacyStage::Finished;

    fn classify(event: LegacyEvent) -> Signal<u64, LegacyStage> {
        match event {
            LegacyEvent::Picked(job_hash) => Signal::Stage {
                stage: LegacyStage::Picked,
                correlation: Some(job_hash),
                peer: None,
            },

            LegacyEvent::Witness(artifact) => Signal::Finished { artifact, correlation: None },
        }
    }
}
