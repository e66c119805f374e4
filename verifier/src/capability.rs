use std::{
    fmt,
    sync::Arc,
};

use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use log::debug;
use anyhow;

use crate::CapabilityKey;

// one-off setup of a verifier, e.g. loading its tables
pub type InitFn = fn() -> BoxFuture<'static, anyhow::Result<()>>;

// serialized proof in, `[program_hash, program_output]` json out
pub type VerifyFn = fn(&str) -> anyhow::Result<String>;

/// A lazily initialized verification routine.
///
/// Clones share the initialization state, so a capability resolved twice
/// from the same registry is set up only once.
#[derive(Clone)]
pub struct Capability {
    key: CapabilityKey,
    init: InitFn,
    verify: VerifyFn,
    ready: Arc<OnceCell<()>>,
}

impl Capability {
    pub fn new(
        key: CapabilityKey,
        init: InitFn,
        verify: VerifyFn,
    ) -> Self {
        Self {
            key,
            init,
            verify,
            ready: Arc::new(OnceCell::new()),
        }
    }

    pub fn key(&self) -> CapabilityKey {
        self.key
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    /// Runs the initializer once; later calls return immediately and
    /// concurrent callers wait for the one in flight.
    pub async fn init(&self) -> anyhow::Result<()> {
        self.ready
            .get_or_try_init(|| {
                debug!("Initializing the `{}` verifier...", self.key);
                (self.init)()
            })
            .await?;
        Ok(())
    }

    pub fn verify(&self, proof: &str) -> anyhow::Result<String> {
        if false == self.is_initialized() {
            anyhow::bail!("verifier `{}` was used before being initialized", self.key);
        }
        (self.verify)(proof)
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("key", &self.key)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Family, Commitment};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static INITS: AtomicUsize = AtomicUsize::new(0);

    fn counting_init() -> BoxFuture<'static, anyhow::Result<()>> {
        async {
            INITS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn echo(proof: &str) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&(proof, proof.len()))?)
    }

    fn key() -> CapabilityKey {
        CapabilityKey::new(Family::Dex, Commitment::Keccak256)
    }

    #[tokio::test]
    async fn init_runs_once_across_clones() {
        let capability = Capability::new(key(), counting_init, echo);
        let clone = capability.clone();
        capability.init().await.unwrap();
        clone.init().await.unwrap();
        capability.init().await.unwrap();
        assert_eq!(INITS.load(Ordering::SeqCst), 1);
        assert!(clone.is_initialized());
    }

    #[test]
    fn verify_requires_init() {
        let capability = Capability::new(key(), counting_init, echo);
        assert!(capability.verify("{}").is_err());
    }
}
