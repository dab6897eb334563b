use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

use engram_types::normalize;

use crate::{Error, Result};

/// An embedding backend. Outputs must be unit-L2-normalized; every store
/// distance assumes it. Implementations must be order-independent: the
/// result for a text never depends on other calls in flight.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic feature-hashing embedder.
///
/// Word unigrams and bigrams hash into a fixed-dimension signed bucket
/// space. No model download, no IO, identical output for identical input —
/// the default backend and the test embedder. Model-based backends plug in
/// behind the [`Embedder`] trait.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(2) }
    }

    fn accumulate(&self, vector: &mut [f32], token: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) as usize
            % self.dim;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(|t| t.to_string())
            .collect();

        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);
        }
        for bigram in tokens.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", bigram[0], bigram[1]), 0.5);
        }

        if vector.iter().all(|x| *x == 0.0) {
            // Degenerate input still gets a valid unit vector.
            vector[0] = 1.0;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// Process-wide shared embedder handle.
///
/// Lazily initialized on first acquire, torn down on dispose. Dispose is
/// idempotent; the next acquire re-initializes.
static SHARED: Lazy<Mutex<Option<Arc<dyn Embedder>>>> = Lazy::new(|| Mutex::new(None));

/// Get the shared embedder, initializing the default backend at the given
/// dimension on first use.
pub fn acquire(default_dim: usize) -> Result<Arc<dyn Embedder>> {
    let mut guard = SHARED
        .lock()
        .map_err(|_| Error::EmbedderUnavailable("embedder lock poisoned".to_string()))?;
    if guard.is_none() {
        *guard = Some(Arc::new(HashEmbedder::new(default_dim)));
    }
    Ok(guard.as_ref().expect("just initialized").clone())
}

/// Replace the shared backend (e.g. with a model-based embedder).
pub fn install(embedder: Arc<dyn Embedder>) -> Result<()> {
    let mut guard = SHARED
        .lock()
        .map_err(|_| Error::EmbedderUnavailable("embedder lock poisoned".to_string()))?;
    *guard = Some(embedder);
    Ok(())
}

/// Tear down the shared backend. Safe to call repeatedly.
pub fn dispose() {
    if let Ok(mut guard) = SHARED.lock() {
        *guard = None;
    }
}
