use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::audio::backend::AudioBackend;
use crate::error::Result;
use crate::helper::HelperClient;

/// Kernel-module fallback: loads `snd_aloop` through the privileged
/// helper so ALSA exposes a loopback card applications can record from.
pub struct SndAloopBackend {
    helper: Arc<dyn HelperClient>,
}

impl SndAloopBackend {
    pub fn new(helper: Arc<dyn HelperClient>) -> Self {
        Self { helper }
    }
}

#[async_trait]
impl AudioBackend for SndAloopBackend {
    async fn ready(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<Value> {
        self.helper.call("snd_aloop.load", json!({})).await?;
        Ok(json!({"backend": "snd_aloop", "modules": []}))
    }

    async fn stop(&self, _state: &Value) {
        if let Err(e) = self.helper.call("snd_aloop.unload", json!({})).await {
            warn!("snd_aloop unload failed: {}", e);
        }
    }
}
