#![doc = include_str!("../README.md")]

pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod protocol;
pub mod sse;
pub mod subscribe;
pub mod tracker;

pub use api::{Delegate, DelegatorClient};
pub use config::{Config, ProtocolRevision};
pub use error::TrackError;
pub use protocol::{Delegation, Legacy, Protocol};
pub use subscribe::{
    subscribe, subscribe_with, Endpoint, Subscription, SubscriptionHandle,
};
pub use tracker::{verify_artifact, Outcome, Report, Tracker};
