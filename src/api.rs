use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use log::info;

use crate::{
    config::Config,
    error::TrackError,
    protocol::Protocol,
    subscribe::{self, Endpoint, Subscription},
};

/// Hands a Cairo PIE to the network and returns the job's identity.
#[async_trait]
pub trait Delegate<P: Protocol>: Send + Sync {
    async fn delegate(&self, pie: Vec<u8>) -> Result<P::JobId, TrackError>;
}

#[derive(Debug, Serialize)]
struct DelegateRequest {
    cairo_pie: Vec<u8>,
}

/// HTTP client of a delegator node.
#[derive(Debug, Clone)]
pub struct DelegatorClient {
    http: reqwest::Client,
    api_url: String,
    delegate_path: String,
    events_path: String,
    status_path: Option<String>,
}

impl DelegatorClient {
    pub fn new(config: &Config) -> Result<Self, TrackError> {
        // no overall timeout, event streams stay open for the whole job
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            delegate_path: config.delegate_path.clone(),
            events_path: config.events_path.clone(),
            status_path: config.status_path.clone(),
        })
    }

    pub fn events<P: Protocol>(&self, id: &P::JobId) -> Endpoint {
        Endpoint::new(format!("{}{}", self.api_url, self.events_path))
            .with_query(P::ID_QUERY, id)
    }

    pub fn status<P: Protocol>(&self, id: &P::JobId) -> Option<Endpoint> {
        self.status_path.as_ref().map(|path| {
            Endpoint::new(format!("{}{}", self.api_url, path))
                .with_query(P::ID_QUERY, id)
        })
    }

    pub fn subscribe<P: Protocol>(&self, id: &P::JobId) -> Subscription {
        subscribe::subscribe(&self.http, self.events::<P>(id), self.status::<P>(id))
    }
}

#[async_trait]
impl<P: Protocol> Delegate<P> for DelegatorClient {
    async fn delegate(&self, pie: Vec<u8>) -> Result<P::JobId, TrackError> {
        let url = format!("{}{}", self.api_url, self.delegate_path);
        info!("Delegating a `{}` byte PIE to `{url}`", pie.len());
        let response = self.http
            .post(&url)
            .json(&DelegateRequest { cairo_pie: pie })
            .send()
            .await?;
        let status = response.status();
        if false == status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TrackError::Submission(format!("`{url}` answered `{status}`: {message}")));
        }
        let body: Value = response.json().await?;
        job_id::<P>(body)
    }
}

fn job_id<P: Protocol>(mut body: Value) -> Result<P::JobId, TrackError> {
    let id = body
        .get_mut(P::ID_FIELD)
        .map(Value::take)
        .ok_or_else(|| TrackError::Submission(format!("response has no `{}`", P::ID_FIELD)))?;
    serde_json::from_value(id)
        .map_err(|e| TrackError::Submission(format!("invalid job identity: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Delegation, JobKey, Legacy};
    use serde_json::json;

    fn client() -> DelegatorClient {
        let config = Config {
            api_url: String::from("http://delegator:3010/"),
            status_path: Some(String::from("/job_status")),
            ..Config::default()
        };
        DelegatorClient::new(&config).unwrap()
    }

    #[test]
    fn endpoints_carry_the_job() {
        let key = Delegation::parse_id("job-1").unwrap();
        let events = client().events::<Delegation>(&key);
        assert_eq!(events.url, "http://delegator:3010/job_events");
        assert_eq!(events.query, vec![(String::from("job_key"), String::from("job-1"))]);
        let status = client().status::<Legacy>(&7).unwrap();
        assert_eq!(status.url, "http://delegator:3010/job_status");
        assert_eq!(status.query, vec![(String::from("job_hash"), String::from("7"))]);
    }

    #[test]
    fn no_status_path_no_snapshot() {
        let client = DelegatorClient::new(&Config::default()).unwrap();
        assert_eq!(client.status::<Legacy>(&7), None);
    }

    #[test]
    fn identity_is_read_per_revision() {
        assert_eq!(job_id::<Legacy>(json!({"job_hash": 99})).unwrap(), 99);
        let key: JobKey = job_id::<Delegation>(json!({"job_key": "0xabc"})).unwrap();
        assert_eq!(key.to_string(), "0xabc");
        assert!(matches!(
            job_id::<Delegation>(json!({"job_hash": 99})),
            Err(TrackError::Submission(_))
        ));
        assert!(matches!(
            job_id::<Legacy>(json!({"job_hash": "abc"})),
            Err(TrackError::Submission(_))
        ));
    }
}
