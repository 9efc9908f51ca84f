use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Action, Config, Rgb};

/// WLED is expected to answer immediately; the request is fire-and-forget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do to the device when a message arrives. Resolved from the
/// config once, so the poll worker never sees the configured action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    On,
    Off,
    Color(Rgb),
    Effect(u8),
    Preset(u8),
}

impl From<&Config> for DeviceAction {
    fn from(config: &Config) -> Self {
        match config.action {
            Action::On => DeviceAction::On,
            Action::Off => DeviceAction::Off,
            Action::Color => DeviceAction::Color(config.color),
            Action::Effect => DeviceAction::Effect(config.effect),
            Action::Preset => DeviceAction::Preset(config.preset),
        }
    }
}

#[derive(Debug, Serialize)]
struct StateBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<Vec<Segment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preset: Option<u8>,
}

#[derive(Debug, Serialize)]
struct Segment {
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<[[u8; 3]; 1]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effect: Option<u8>,
}

fn state_body(action: &DeviceAction) -> StateBody {
    match *action {
        DeviceAction::On => StateBody {
            on: Some(true),
            segments: None,
            preset: None,
        },
        DeviceAction::Off => StateBody {
            on: Some(false),
            segments: None,
            preset: None,
        },
        DeviceAction::Color(c) => StateBody {
            on: Some(true),
            segments: Some(vec![Segment {
                color: Some([[c.r, c.g, c.b]]),
                effect: None,
            }]),
            preset: None,
        },
        DeviceAction::Effect(n) => StateBody {
            on: Some(true),
            segments: Some(vec![Segment {
                color: None,
                effect: Some(n),
            }]),
            preset: None,
        },
        DeviceAction::Preset(n) => StateBody {
            on: None,
            segments: None,
            preset: Some(n),
        },
    }
}

/// HTTP client for one WLED device's `/json/state` endpoint.
///
/// Each call is a single idempotent state replacement; no retries. A failed
/// request is the caller's problem to report, and the caller should not
/// replay the message that caused it.
pub struct WledClient {
    client: reqwest::Client,
    url: String,
}

impl WledClient {
    pub fn new(device_address: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://{}/json/state", device_address),
        }
    }

    pub async fn set_state(&self, action: &DeviceAction) -> Result<()> {
        let body = state_body(action);
        debug!("WLED {:?} -> {}", action, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach WLED at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("WLED error ({})", status);
        }
        Ok(())
    }
}

/// The seam between the poll worker and the device: one capability, fired
/// once per accepted message.
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn fire(&self) -> Result<()>;
}

/// Concrete trigger binding a WLED client to the configured action.
pub struct WledTrigger {
    client: WledClient,
    action: DeviceAction,
}

impl WledTrigger {
    pub fn new(config: &Config) -> Self {
        Self {
            client: WledClient::new(&config.wled_ip),
            action: DeviceAction::from(config),
        }
    }
}

#[async_trait]
impl Trigger for WledTrigger {
    async fn fire(&self) -> Result<()> {
        info!("Triggering WLED ({:?})", self.action);
        self.client.set_state(&self.action).await
    }
}
