use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use super::background::BackgroundQueue;
use crate::api::{ApiClient, TelemetryEvent, TelemetryRequest};

/// Non-reversible hash of the ephemeral session id; the raw id never
/// leaves the device.
pub fn hash_session_id(session_id: &str) -> String {
    hex::encode(Sha256::digest(session_id.as_bytes()))
}

/// Privacy-preserving analytics for anonymous sessions. All events go
/// through the background queue; failures are logged and dropped.
pub struct Telemetry {
    api: Arc<ApiClient>,
    queue: BackgroundQueue,
}

impl Telemetry {
    pub fn new(api: Arc<ApiClient>, queue: BackgroundQueue) -> Self {
        Self { api, queue }
    }

    /// Record a send failure for an anonymous session.
    pub fn record_send_error(&self, session_id: &str, code: &str, model: Option<String>) {
        let request = TelemetryRequest {
            session_hash: hash_session_id(session_id),
            events: vec![TelemetryEvent {
                kind: "send_error".to_string(),
                code: Some(code.to_string()),
                model,
                timestamp: Utc::now(),
            }],
        };
        let api = self.api.clone();
        self.queue.enqueue("error-telemetry", async move {
            api.post_error_events(&request).await?;
            Ok(())
        });
    }

    /// Record a usage event batch for an anonymous session.
    pub fn record_usage(&self, session_id: &str, events: Vec<TelemetryEvent>) {
        if events.is_empty() {
            return;
        }
        let request = TelemetryRequest {
            session_hash: hash_session_id(session_id),
            events,
        };
        let api = self.api.clone();
        self.queue.enqueue("usage-telemetry", async move {
            api.post_usage_events(&request).await?;
            Ok(())
        });
    }
}
