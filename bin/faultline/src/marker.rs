use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::GenericError,
    http::{join_segments, parse_base_url},
};

const MARKER_TYPE: &str = "deploy";

/// Something that can record deploy markers with an external service.
#[async_trait]
pub trait MarkerNotifier: Send + Sync + 'static {
    /// Records a deploy marker with the given message.
    ///
    /// Notifiers that are not configured succeed without doing anything.
    ///
    /// # Errors
    ///
    /// If the marker cannot be delivered, an error is returned.
    async fn send_marker(&self, message: &str) -> Result<(), GenericError>;
}

/// Credentials for the Honeycomb markers API.
#[derive(Clone, Debug)]
pub struct HoneycombCredentials {
    /// API key, sent in the `X-Honeycomb-Team` header.
    pub api_key: String,

    /// Dataset the markers are attached to.
    pub dataset: String,
}

impl HoneycombCredentials {
    /// Builds credentials from optional parts.
    ///
    /// Returns `None` unless both the API key and the dataset are present and non-empty.
    pub fn from_parts(api_key: Option<String>, dataset: Option<String>) -> Option<Self> {
        match (api_key, dataset) {
            (Some(api_key), Some(dataset)) if !api_key.is_empty() && !dataset.is_empty() => {
                Some(Self { api_key, dataset })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct MarkerPayload<'a> {
    start_time: i64,
    message: &'a str,
    #[serde(rename = "type")]
    marker_type: &'static str,
}

/// Sends deploy markers to the Honeycomb markers API.
pub struct HoneycombMarkers {
    client: reqwest::Client,
    endpoint: Url,
    credentials: Option<HoneycombCredentials>,
}

impl HoneycombMarkers {
    /// Creates a new `HoneycombMarkers`.
    ///
    /// When `credentials` is `None`, every marker is skipped.
    ///
    /// # Errors
    ///
    /// If `endpoint` is not a valid base URL, an error is returned.
    pub fn new(
        client: reqwest::Client, endpoint: &str, credentials: Option<HoneycombCredentials>,
    ) -> Result<Self, GenericError> {
        Ok(Self {
            client,
            endpoint: parse_base_url(endpoint)?,
            credentials,
        })
    }
}

#[async_trait]
impl MarkerNotifier for HoneycombMarkers {
    async fn send_marker(&self, message: &str) -> Result<(), GenericError> {
        let Some(credentials) = &self.credentials else {
            info!("Honeycomb API key not found, skipping marker");
            return Ok(());
        };

        let payload = MarkerPayload {
            start_time: chrono::Utc::now().timestamp(),
            message,
            marker_type: MARKER_TYPE,
        };

        self.client
            .post(join_segments(&self.endpoint, &["1", "markers", credentials.dataset.as_str()]))
            .header("X-Honeycomb-Team", &credentials.api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        debug!(message, dataset = %credentials.dataset, "Sent marker.");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Notifier that records every marker message.
    #[derive(Default)]
    pub struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarkerNotifier for RecordingNotifier {
        async fn send_marker(&self, message: &str) -> Result<(), GenericError> {
            self.messages.lock().unwrap().push(message.to_string());
            if self.fail {
                Err(anyhow::anyhow!("marker API unavailable"))
            } else {
                Ok(())
            }
        }
    }
}
