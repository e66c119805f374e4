use std::{
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use serde_json::Value;
use tokio::{
    runtime,
    sync::oneshot,
    time,
};
use log::{info, warn};

use crate::{
    Capability, CapabilityKey, ProofHeader, Registry,
    UnsupportedCapability,
};

/// Outcome of running a verifier over a proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified {
        program_hash: String,
        program_output: String,
    },

    Failed(String),
}

// the one message a worker accepts
struct Request {
    key: CapabilityKey,
    proof: String,
    reply: oneshot::Sender<Response>,
}

// and the one it answers with
enum Response {
    Done(Verification),
    Unsupported(UnsupportedCapability),
}

/// Runs verifiers on a dedicated worker thread, a fresh one per proof.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<Registry>,
}

impl Executor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn verify(
        &self,
        key: CapabilityKey,
        proof: String,
    ) -> Result<Verification, UnsupportedCapability> {
        let (req_tx, req_rx) = mpsc::channel();
        let registry = Arc::clone(&self.registry);
        let handle = match thread::Builder::new()
            .name(format!("verifier-{key}"))
            .spawn(move || worker(registry, req_rx))
        {
            Ok(h) => h,

            Err(e) => {
                warn!("Failed to spawn a verifier worker: `{e:?}`");
                return Ok(Verification::Failed(format!("verifier worker is unavailable: {e}")));
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if let Err(e) = req_tx.send(Request { key, proof, reply: reply_tx }) {
            warn!("Verifier worker is gone before the request: `{e:?}`");
        }
        drop(req_tx);
        info!("Verifying the proof with `{key}`...");
        let response = reply_rx.await;
        // reclaim the worker, it exits right after answering
        loop {
            if handle.is_finished() {
                break
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        if handle.join().is_err() {
            warn!("Verifier worker for `{key}` did not exit cleanly.");
        }
        match response {
            Ok(Response::Done(verification)) => Ok(verification),

            Ok(Response::Unsupported(e)) => Err(e),

            Err(_) => Ok(Verification::Failed(
                String::from("verifier worker exited without an answer")
            )),
        }
    }
}

fn worker(
    registry: Arc<Registry>,
    requests: mpsc::Receiver<Request>,
) {
    let Ok(Request { key, proof, reply }) = requests.recv() else {
        warn!("Verifier worker received no request.");
        return
    };
    let response = match registry.resolve_key(key) {
        Ok(capability) => Response::Done(run(&capability, &proof)),

        Err(e) => Response::Unsupported(e),
    };
    if reply.send(response).is_err() {
        warn!("Failed to share the verification result: nobody is waiting for `{key}`.");
    }
}

fn run(
    capability: &Capability,
    proof: &str,
) -> Verification {
    let key = capability.key();
    // the proof must be routed by its own tags
    if let Ok(declared) = ProofHeader::parse(proof.as_bytes())
        .map_err(|_| ())
        .and_then(|h| h.capability_key().map_err(|_| ()))
    {
        if declared != key {
            return Verification::Failed(format!("proof declares `{declared}` but was sent to `{key}`"));
        }
    }
    // initializers may lean on tokio timers and io
    let rt = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,

        Err(e) => return Verification::Failed(format!("`{key}` verifier has no runtime: {e}")),
    };
    match panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(capability.init()))) {
        Ok(Ok(())) => {},

        Ok(Err(e)) => {
            return Verification::Failed(format!("`{key}` verifier failed to initialize: {e:#}"))
        },

        Err(_) => return Verification::Failed(format!("`{key}` verifier panicked while initializing")),
    }
    match panic::catch_unwind(AssertUnwindSafe(|| capability.verify(proof))) {
        Ok(Ok(output)) => parse_output(&output),

        Ok(Err(e)) => Verification::Failed(format!("{e:#}")),

        Err(_) => Verification::Failed(format!("`{key}` verifier panicked")),
    }
}

// `[program_hash, program_output]`
fn parse_output(output: &str) -> Verification {
    match serde_json::from_str::<(Value, Value)>(output) {
        Ok((program_hash, program_output)) => Verification::Verified {
            program_hash: opaque(program_hash),
            program_output: opaque(program_output),
        },

        Err(e) => Verification::Failed(format!("unexpected verifier output: {e}")),
    }
}

fn opaque(value: Value) -> String {
    match value {
        Value::String(s) => s,

        other => other.to_string(),
    }
}
