//! Screen/event API client.
//!
//! Every running instance publishes an HTTP API for observing and driving
//! the simulated device: screen capture, the current-screen text elements,
//! physical button presses and finger touches. Endpoints may be briefly
//! unreachable while an instance boots; callers polling through this client
//! treat that as "no data yet".

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::device::{SwipeDirection, TouchButton};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Per-request timeout against the device API.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// UiEvent
// ============================================================================

/// A text element currently displayed on the simulated screen.
///
/// The event log returned by [`DeviceApi::events`] is the wholesale current
/// screen state, not an accumulating history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiEvent {
    /// Displayed text.
    pub text: String,
    /// Bounding-box x coordinate.
    #[serde(default)]
    pub x: i32,
    /// Bounding-box y coordinate.
    #[serde(default)]
    pub y: i32,
    /// Bounding-box width.
    #[serde(default, rename = "w")]
    pub width: u32,
    /// Bounding-box height.
    #[serde(default, rename = "h")]
    pub height: u32,
}

#[derive(Deserialize)]
struct EventsReply {
    events: Vec<UiEvent>,
}

// ============================================================================
// PhysicalButton
// ============================================================================

/// Physical buttons of a two-button device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalButton {
    /// The left button.
    Left,
    /// The right button.
    Right,
    /// Both buttons together.
    Both,
}

impl PhysicalButton {
    /// Returns the API endpoint path segment for this button.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Both => "both",
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Serialize)]
struct ButtonPayload {
    action: &'static str,
}

#[derive(Serialize)]
struct FingerPayload {
    action: &'static str,
    x: u32,
    y: u32,
    delay: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<SwipeDirection>,
}

// ============================================================================
// DeviceApi
// ============================================================================

/// Client for one instance's screen/event API.
#[derive(Debug, Clone)]
pub struct DeviceApi {
    base: Url,
    client: reqwest::Client,
}

impl DeviceApi {
    /// Creates a client for the API published at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the host does not form a valid URL.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let base = Url::parse(&format!("http://{host}:{port}/"))
            .map_err(|e| Error::config(format!("invalid device API address: {e}")))?;
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    /// Returns the API base URL.
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::config(format!("invalid device API path {path}: {e}")))
    }

    /// Captures the current screen as raw image bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the endpoint is unreachable or answers
    /// with a non-success status.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.endpoint("screenshot")?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        trace!(len = bytes.len(), "Screenshot captured");
        Ok(bytes.to_vec())
    }

    /// Returns the current-screen event log.
    ///
    /// An unreachable endpoint yields an empty log: during instance startup
    /// the API briefly refuses connections and polling callers just try
    /// again on the next tick.
    pub async fn events(&self) -> Vec<UiEvent> {
        match self.fetch_events().await {
            Ok(events) => events,
            Err(e) => {
                trace!(error = %e, "Event fetch failed, treating as empty");
                Vec::new()
            }
        }
    }

    async fn fetch_events(&self) -> Result<Vec<UiEvent>> {
        let response = self
            .client
            .get(self.endpoint("events")?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let reply: EventsReply = response.json().await?;
        Ok(reply.events)
    }

    /// Clears the on-device event log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the endpoint is unreachable.
    pub async fn delete_events(&self) -> Result<()> {
        self.client
            .delete(self.endpoint("events")?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        debug!("Event log cleared");
        Ok(())
    }

    /// Presses and releases a physical button.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the endpoint is unreachable.
    pub async fn press_button(&self, button: PhysicalButton) -> Result<()> {
        self.button_action(button, "press-and-release").await
    }

    /// Sends the reset action through the both-buttons endpoint, returning
    /// the device to its initial screen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the endpoint is unreachable.
    pub async fn reset_device(&self) -> Result<()> {
        self.button_action(PhysicalButton::Both, "reset").await
    }

    async fn button_action(&self, button: PhysicalButton, action: &'static str) -> Result<()> {
        let path = format!("button/{}", button.as_str());
        self.client
            .post(self.endpoint(&path)?)
            .timeout(REQUEST_TIMEOUT)
            .json(&ButtonPayload { action })
            .send()
            .await?
            .error_for_status()?;
        debug!(button = button.as_str(), action, "Button action");
        Ok(())
    }

    /// Taps (or swipes) the touch panel at the given region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the endpoint is unreachable.
    pub async fn finger_touch(&self, button: &TouchButton) -> Result<()> {
        let payload = FingerPayload {
            action: "press-and-release",
            x: button.x,
            y: button.y,
            delay: button.delay,
            direction: match button.direction {
                SwipeDirection::NoSwipe => None,
                other => Some(other),
            },
        };
        self.client
            .post(self.endpoint("finger")?)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        debug!(x = button.x, y = button.y, "Finger touch");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let api = DeviceApi::new("127.0.0.1", 5000).unwrap();
        assert_eq!(
            api.endpoint("screenshot").unwrap().as_str(),
            "http://127.0.0.1:5000/screenshot"
        );
        assert_eq!(
            api.endpoint("button/left").unwrap().as_str(),
            "http://127.0.0.1:5000/button/left"
        );
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"events": [{"text": "Ready", "x": 41, "y": 3, "w": 46, "h": 11}]}"#;
        let reply: EventsReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.events.len(), 1);
        assert_eq!(reply.events[0].text, "Ready");
        assert_eq!(reply.events[0].width, 46);
    }

    #[test]
    fn test_event_deserialization_without_bounding_box() {
        // Older emulator builds omit the box fields.
        let json = r#"{"events": [{"text": "Ready"}]}"#;
        let reply: EventsReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.events[0].x, 0);
        assert_eq!(reply.events[0].height, 0);
    }

    #[tokio::test]
    async fn test_events_swallow_unreachable_endpoint() {
        // Port 9 (discard) refuses connections on loopback.
        let api = DeviceApi::new("127.0.0.1", 9).unwrap();
        assert!(api.events().await.is_empty());
    }
}
