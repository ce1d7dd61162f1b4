//! Mixpanel analytics backend.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};
use tokio::sync::OnceCell;
use url::Url;

use super::{Telemetry, TelemetryError, TelemetryEvent, TelemetrySubject, decode_context};

const TRACK_ENDPOINT: &str = "https://api.mixpanel.com/track";
const ENGAGE_ENDPOINT: &str = "https://api.mixpanel.com/engage";
const PUBLIC_IP_ENDPOINT: &str = "http://myexternalip.com/raw";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reports events to Mixpanel.
///
/// Every event carries the server platform, the content identity, the global
/// context given at startup and the per-session context. The distinct id is
/// derived from the platform and the public address of this host, so it is
/// stable across restarts without storing anything.
#[derive(Clone)]
pub struct MixpanelTelemetry {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    token: String,
    global_context: Map<String, Value>,
    distinct_id: OnceCell<String>,
}

impl MixpanelTelemetry {
    /// Creates the backend.
    ///
    /// # Errors
    /// - `TelemetryError::InvalidEncoding` - Global context is not base64 JSON
    /// - `TelemetryError::InvalidContext` - Global context is not a JSON object
    /// - `TelemetryError::Http` - HTTP client could not be built
    pub fn new(token: String, global_context: Option<&str>) -> Result<Self, TelemetryError> {
        let global_context = match global_context {
            Some(encoded) => decode_context(encoded)?,
            None => Map::new(),
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                token,
                global_context,
                distinct_id: OnceCell::new(),
            }),
        })
    }

    /// Registers this server as a people profile. Runs in the background.
    pub fn people_set(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.send_people_set().await {
                tracing::debug!("Mixpanel people update failed: {}", e);
            }
        });
    }

    async fn send_people_set(&self) -> Result<(), TelemetryError> {
        let distinct_id = self.distinct_id().await?;
        let mut properties = platform_properties();
        properties.extend(self.inner.global_context.clone());

        let payload = json!({
            "$token": self.inner.token,
            "$distinct_id": distinct_id,
            "$set": properties,
        });
        self.post(ENGAGE_ENDPOINT, &payload).await
    }

    async fn send_event(
        &self,
        event: TelemetryEvent,
        subject: TelemetrySubject,
    ) -> Result<(), TelemetryError> {
        let session_context = match subject.context.as_deref() {
            Some(encoded) => match decode_context(encoded) {
                Ok(context) => Some(context),
                Err(e) => {
                    tracing::warn!("Ignoring telemetry data for {}: {}", subject.info_hash, e);
                    None
                }
            },
            None => None,
        };

        let mut properties =
            event_properties(&subject, &self.inner.global_context, session_context);
        properties.insert("token".to_string(), Value::from(self.inner.token.clone()));
        properties.insert(
            "distinct_id".to_string(),
            Value::from(self.distinct_id().await?),
        );

        let payload = json!({
            "event": event.name(),
            "properties": properties,
        });
        self.post(TRACK_ENDPOINT, &payload).await
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> Result<(), TelemetryError> {
        let mut url = Url::parse(endpoint).map_err(|e| TelemetryError::InvalidEncoding {
            reason: e.to_string(),
        })?;
        let data = STANDARD.encode(serde_json::to_vec(payload)?);
        url.query_pairs_mut().append_pair("data", &data).append_pair("ip", "0");

        let response = self.inner.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TelemetryError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn distinct_id(&self) -> Result<String, TelemetryError> {
        let client = &self.inner.client;
        let id = self
            .inner
            .distinct_id
            .get_or_try_init(|| async move {
                let response = client.get(PUBLIC_IP_ENDPOINT).send().await?;
                if !response.status().is_success() {
                    return Err(TelemetryError::Rejected {
                        status: response.status().as_u16(),
                    });
                }
                let public_ip = response.text().await?;
                Ok::<_, TelemetryError>(distinct_id_for(public_ip.trim()))
            })
            .await?;
        Ok(id.clone())
    }
}

impl Telemetry for MixpanelTelemetry {
    fn track(&self, event: TelemetryEvent, subject: &TelemetrySubject) {
        let this = self.clone();
        let subject = subject.clone();
        tokio::spawn(async move {
            let info_hash = subject.info_hash;
            if let Err(e) = this.send_event(event, subject).await {
                tracing::debug!("Mixpanel '{}' for {} failed: {}", event.name(), info_hash, e);
            }
        });
    }
}

fn platform_properties() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("Server OS".to_string(), Value::from(std::env::consts::OS));
    properties.insert("Server Arch".to_string(), Value::from(std::env::consts::ARCH));
    properties
}

/// Builds event properties. Later sources override earlier ones: content
/// identity, platform, global context, then session context.
fn event_properties(
    subject: &TelemetrySubject,
    global_context: &Map<String, Value>,
    session_context: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "Magnet InfoHash".to_string(),
        Value::from(subject.info_hash.to_string()),
    );
    properties.insert("Magnet Name".to_string(), Value::from(subject.name.clone()));
    properties.extend(platform_properties());
    properties.extend(global_context.clone());
    if let Some(context) = session_context {
        properties.extend(context);
    }
    properties
}

fn distinct_id_for(public_ip: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(std::env::consts::OS.as_bytes());
    hasher.update(std::env::consts::ARCH.as_bytes());
    hasher.update(public_ip.as_bytes());
    hex::encode(hasher.finalize())
}
