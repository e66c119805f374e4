//! Merges the one-shot status snapshot and the live event stream of a job
//! into a single ordered sequence.
//!
//! Both sources are independent producer tasks feeding one channel, so there
//! is no ordering between the snapshot and the first live events; consumers
//! are expected to absorb duplicates and stale events. Live events keep their
//! arrival order. A failing stream is closed and never reconnected.

use std::{
    cell::Cell,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use futures::{
    future,
    stream::{self, Stream, StreamExt, TryStreamExt},
};
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn};
use anyhow;

use crate::sse::SseDecoder;

/// A URL plus the query it is requested with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(
        mut self,
        key: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

thread_local! {
    // gate of the subscription whose callback runs on this thread, if any
    static DELIVERING: Cell<usize> = Cell::new(0);
}

/// Stops a subscription; cheap to clone and hand to other tasks.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,

    // held while a callback runs
    gate: Arc<Mutex<()>>,
}

impl SubscriptionHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Mutex::new(())),
        }
    }

    fn gate_id(&self) -> usize {
        Arc::as_ptr(&self.gate) as usize
    }

    /// Detaches from both sources. Returns `false` if it was already closed.
    ///
    /// Once this returns no callback runs for the subscription. A callback
    /// already running on another thread is waited for; one closing its own
    /// subscription is not.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false
        }
        self.cancel.cancel();
        if DELIVERING.with(Cell::get) != self.gate_id() {
            drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
        debug!("Subscription is closed.");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// The merged event sequence of one job.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<Value>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn close(&self) -> bool {
        self.handle.close()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Next event, or `None` once closed or once both sources are done.
    pub async fn next(&mut self) -> Option<Value> {
        if self.handle.is_closed() {
            return None
        }
        tokio::select! {
            biased;

            _ = self.handle.cancel.cancelled() => None,

            event = self.events.recv() => event,
        }
    }

    /// Hands every event to `on_event` from a single task.
    pub fn for_each<F>(mut self, mut on_event: F) -> SubscriptionHandle
    where
        F: FnMut(Value) + Send + 'static,
    {
        let handle = self.handle();
        tokio::spawn(async move {
            let gate = Arc::clone(&self.handle.gate);
            let gate_id = self.handle.gate_id();
            while let Some(event) = self.next().await {
                let _delivering = gate.lock().unwrap_or_else(PoisonError::into_inner);
                if self.is_closed() {
                    break
                }
                DELIVERING.with(|d| d.set(gate_id));
                on_event(event);
                DELIVERING.with(|d| d.set(0));
            }
        });
        handle
    }
}

/// Subscribes to the live events of `stream` and, if given, fetches the
/// current status from `fetch` alongside.
pub fn subscribe(
    client: &reqwest::Client,
    stream: Endpoint,
    fetch: Option<Endpoint>,
) -> Subscription {
    merge(
        live_events(client.clone(), stream),
        fetch.map(|endpoint| fetch_snapshot(client.clone(), endpoint)),
    )
}

pub fn subscribe_with<F>(
    client: &reqwest::Client,
    stream: Endpoint,
    fetch: Option<Endpoint>,
    on_event: F,
) -> SubscriptionHandle
where
    F: FnMut(Value) + Send + 'static,
{
    subscribe(client, stream, fetch).for_each(on_event)
}

/// Funnels a live source and an optional snapshot into one subscription.
pub fn merge<S, F>(
    live: S,
    snapshot: Option<F>,
) -> Subscription
where
    S: Stream<Item = anyhow::Result<Value>> + Send + 'static,
    F: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SubscriptionHandle::new();
    tokio::spawn(forward_live(live, tx.clone(), handle.cancel.clone()));
    match snapshot {
        Some(snapshot) => {
            tokio::spawn(forward_snapshot(snapshot, tx, handle.cancel.clone()));
        },

        None => drop(tx),
    }
    Subscription {
        events: rx,
        handle,
    }
}

async fn forward_live<S>(
    live: S,
    tx: mpsc::UnboundedSender<Value>,
    cancel: CancellationToken,
)
where
    S: Stream<Item = anyhow::Result<Value>> + Send + 'static,
{
    let mut live = Box::pin(live);
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,

            item = live.next() => item,
        };
        match item {
            Some(Ok(event)) => {
                if tx.send(event).is_err() {
                    break
                }
            },

            Some(Err(e)) => {
                warn!("Event stream failed and is closed: `{e:#}`");
                break
            },

            None => {
                info!("Event stream has ended.");
                break
            },
        }
    }
}

async fn forward_snapshot<F>(
    snapshot: F,
    tx: mpsc::UnboundedSender<Value>,
    cancel: CancellationToken,
)
where
    F: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let result = tokio::select! {
        _ = cancel.cancelled() => return,

        result = snapshot => result,
    };
    match result {
        Ok(event) => {
            let _ = tx.send(event);
        },

        // the live stream still has the job covered
        Err(e) => warn!("Failed to fetch the job status: `{e:#}`"),
    }
}

fn live_events(
    client: reqwest::Client,
    endpoint: Endpoint,
) -> impl Stream<Item = anyhow::Result<Value>> + Send {
    let connect = async move {
        let response = client
            .get(&endpoint.url)
            .query(&endpoint.query)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        info!("Subscribed to job events at `{}`", endpoint.url);
        Ok::<_, anyhow::Error>(response.bytes_stream().map_err(anyhow::Error::from))
    };
    stream::once(connect)
        .try_flatten()
        .scan(SseDecoder::new(), |decoder, chunk| {
            let events: Vec<anyhow::Result<Value>> = match chunk {
                Ok(bytes) => match decoder.push(&bytes) {
                    Ok(frames) => frames
                        .into_iter()
                        .filter_map(parse_frame)
                        .map(Ok)
                        .collect(),

                    Err(e) => vec![Err(e)],
                },

                Err(e) => vec![Err(e)],
            };
            future::ready(Some(stream::iter(events)))
        })
        .flatten()
}

fn parse_frame(data: String) -> Option<Value> {
    match serde_json::from_str(&data) {
        Ok(event) => Some(event),

        Err(e) => {
            warn!("Dropped an event that is not json: `{e}`");
            None
        }
    }
}

async fn fetch_snapshot(
    client: reqwest::Client,
    endpoint: Endpoint,
) -> anyhow::Result<Value> {
    let snapshot = client
        .get(&endpoint.url)
        .query(&endpoint.query)
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;
    debug!("Job status snapshot: `{snapshot}`");
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{sync::Mutex, time::Duration};
    use tokio::time::sleep;

    type Snapshot = future::Ready<anyhow::Result<Value>>;

    fn live(events: Vec<Value>) -> impl Stream<Item = anyhow::Result<Value>> + Send {
        stream::iter(events.into_iter().map(Ok))
    }

    async fn drain(subscription: &mut Subscription) -> Vec<Value> {
        let mut events = Vec::new();
        while let Some(event) = subscription.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn live_events_keep_their_order() {
        let events: Vec<Value> = (0..20).map(|i| json!({ "n": i })).collect();
        let mut subscription = merge(live(events.clone()), None::<Snapshot>);
        assert_eq!(drain(&mut subscription).await, events);
    }

    #[tokio::test]
    async fn snapshot_is_merged_in() {
        let mut subscription = merge(
            live(vec![json!({"type": "Propagated"})]),
            Some(future::ready(Ok(json!({"type": "Delegated", "data": "p1"})))),
        );
        let events = drain(&mut subscription).await;
        assert_eq!(events.len(), 2);
        assert!(events.contains(&json!({"type": "Delegated", "data": "p1"})));
    }

    #[tokio::test]
    async fn failed_snapshot_leaves_the_stream_alone() {
        let mut subscription = merge(
            live(vec![json!(1), json!(2)]),
            Some(future::ready(Err(anyhow::anyhow!("503")))),
        );
        assert_eq!(drain(&mut subscription).await, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn stream_error_stops_forwarding() {
        let items = vec![
            Ok(json!(1)),
            Err(anyhow::anyhow!("connection reset")),
            Ok(json!(2)),
        ];
        let mut subscription = merge(stream::iter(items), None::<Snapshot>);
        assert_eq!(drain(&mut subscription).await, vec![json!(1)]);
        assert!(false == subscription.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut subscription = merge(stream::pending::<anyhow::Result<Value>>(), None::<Snapshot>);
        let handle = subscription.handle();
        assert!(handle.close());
        assert!(false == handle.close());
        assert!(false == subscription.close());
        assert!(subscription.is_closed());
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_close() {
        let mut subscription = merge(
            live(vec![json!(1), json!(2)]),
            Some(async {
                sleep(Duration::from_millis(20)).await;
                Ok(json!(3))
            }),
        );
        assert_eq!(subscription.next().await, Some(json!(1)));
        subscription.close();
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_waits_for_a_running_callback() {
        let busy = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(Mutex::new(0usize));
        let (flag, counter) = (Arc::clone(&busy), Arc::clone(&calls));
        let events = (0..1000).map(|i| Ok::<Value, anyhow::Error>(json!(i)));
        let handle = merge(stream::iter(events), None::<Snapshot>)
            .for_each(move |_| {
                flag.store(true, Ordering::SeqCst);
                *counter.lock().unwrap() += 1;
                std::thread::sleep(Duration::from_millis(20));
                flag.store(false, Ordering::SeqCst);
            });
        while *calls.lock().unwrap() == 0 {
            sleep(Duration::from_millis(1)).await;
        }
        assert!(handle.close());
        assert!(false == busy.load(Ordering::SeqCst));
        let seen = *calls.lock().unwrap();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(*calls.lock().unwrap(), seen);
    }

    #[tokio::test]
    async fn callback_can_close_its_own_subscription() {
        let subscription = merge(live(vec![json!(1), json!(2), json!(3)]), None::<Snapshot>);
        let handle = subscription.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        subscription.for_each(move |event| {
            sink.lock().unwrap().push(event);
            assert!(handle.close());
        });
        sleep(Duration::from_millis(30)).await;
        assert_eq!(*seen.lock().unwrap(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn callbacks_see_every_event_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = merge(live(vec![json!("a"), json!("b")]), None::<Snapshot>)
            .for_each(move |event| sink.lock().unwrap().push(event));
        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 {
                break
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![json!("a"), json!("b")]);
        assert!(handle.close());
    }
}
