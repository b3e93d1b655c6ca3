//! TV media player entity. State is assumed: the IR link is one-way, so
//! playback state tracks the commands we send rather than the television.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use super::client::ApiError;
use super::entity::CommandContext;
use super::entity::NatureEntity;
use super::entity::PollUpdate;
use super::entity::Resolution;
use super::models::Appliance;
use super::models::TvState;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::Platform;

/// Vendor input codes mapped to user-facing source names.
fn input_source(input: &str) -> Option<&'static str> {
    match input {
        "t" => Some("terrestrial"),
        "bs" => Some("bs"),
        "cs" => Some("cs"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackState {
    Off,
    Idle,
    Playing,
    Paused,
}

impl PlaybackState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

pub struct TvEntity {
    entity_id: String,
    appliance_id: String,
    device_id: String,
    name: String,
    available: bool,
    buttons: Vec<String>,
    playback: PlaybackState,
    source: Option<String>,
    muted: bool,
}

impl TvEntity {
    pub fn new(appliance: &Appliance) -> Self {
        let mut entity = Self {
            entity_id: format!("media_player.{}-tv", appliance.id),
            appliance_id: appliance.id.clone(),
            device_id: appliance.device.id.clone(),
            name: appliance.nickname.clone(),
            available: false,
            buttons: Vec::new(),
            playback: PlaybackState::Off,
            source: None,
            muted: false,
        };
        entity.read(appliance);
        entity.available = true;
        entity
    }

    fn read(&mut self, appliance: &Appliance) {
        if let Some(tv) = &appliance.tv {
            self.buttons = tv.buttons.iter().map(|b| b.name.clone()).collect();
            self.apply_tv_state(&tv.state);
        }
    }

    fn apply_tv_state(&mut self, state: &TvState) {
        self.source = state
            .input
            .as_deref()
            .and_then(input_source)
            .map(|s| s.to_string());
    }

    fn has_button(&self, name: &str) -> bool {
        self.buttons.iter().any(|b| b == name)
    }

    fn source_list(&self) -> Vec<String> {
        self.buttons
            .iter()
            .filter_map(|b| b.strip_prefix("input-"))
            .map(|s| s.to_string())
            .collect()
    }

    /// Capabilities implied by the buttons this TV was taught.
    fn supported(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if self.has_button("power") {
            features.push("turn_on");
            features.push("turn_off");
        }
        if !self.source_list().is_empty() {
            features.push("select_source");
        }
        if self.has_button("mute") {
            features.push("volume_mute");
        }
        if self.has_button("vol-up") && self.has_button("vol-down") {
            features.push("volume_step");
        }
        if self.has_button("play") {
            features.push("play");
        }
        if self.has_button("pause") {
            features.push("pause");
        }
        if self.has_button("stop") {
            features.push("stop");
        }
        if self.has_button("prev") {
            features.push("previous_track");
        }
        if self.has_button("next") {
            features.push("next_track");
        }
        features
    }

    async fn post_button(&mut self, ctx: &CommandContext, button: &str) -> Result<(), ApiError> {
        let path = format!("appliances/{}/tv", self.appliance_id);
        let form = vec![("button".to_string(), button.to_string())];
        let response = ctx.client.post(&path, &form).await?;
        if let Ok(state) = serde_json::from_value::<TvState>(response) {
            self.apply_tv_state(&state);
        }
        Ok(())
    }
}

impl Entity for TvEntity {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::MediaPlayer
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state_json(&self) -> serde_json::Value {
        json!({
            "state": self.playback.as_str(),
            "source": self.source,
            "source_list": self.source_list(),
            "is_volume_muted": self.muted,
            "supported": self.supported(),
            "device_class": "tv",
            "icon": "mdi:television",
            "assumed_state": true,
        })
    }
}

#[async_trait]
impl NatureEntity for TvEntity {
    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn on_appliances(&mut self, update: &PollUpdate<'_, Appliance>, _now: DateTime<Utc>) -> bool {
        match update.resolve(&self.appliance_id) {
            Resolution::Unchanged => false,
            Resolution::Unavailable => {
                let was = self.available;
                self.available = false;
                was
            }
            Resolution::Available(appliance) => {
                self.available = true;
                self.read(appliance);
                true
            }
        }
    }

    async fn handle_command(
        &mut self,
        ctx: &CommandContext,
        command: EntityCommand,
    ) -> Result<bool, ApiError> {
        match command {
            EntityCommand::TurnOn { .. } => {
                self.post_button(ctx, "power").await?;
                if self.playback == PlaybackState::Off {
                    self.playback = PlaybackState::Idle;
                }
            }
            EntityCommand::TurnOff => {
                self.post_button(ctx, "power").await?;
                self.playback = PlaybackState::Off;
            }
            EntityCommand::SelectSource { source } => {
                let button = format!("input-{source}");
                self.post_button(ctx, &button).await?;
            }
            EntityCommand::MuteVolume { mute } => {
                self.post_button(ctx, "mute").await?;
                self.muted = mute;
            }
            EntityCommand::VolumeUp => {
                self.post_button(ctx, "vol-up").await?;
                self.muted = false;
            }
            EntityCommand::VolumeDown => {
                self.post_button(ctx, "vol-down").await?;
                self.muted = false;
            }
            EntityCommand::MediaPlay => {
                self.post_button(ctx, "play").await?;
                self.playback = PlaybackState::Playing;
            }
            EntityCommand::MediaPause => {
                self.post_button(ctx, "pause").await?;
                self.playback = PlaybackState::Paused;
            }
            EntityCommand::MediaStop => {
                self.post_button(ctx, "pause").await?;
                self.playback = PlaybackState::Idle;
            }
            EntityCommand::MediaPreviousTrack => {
                self.post_button(ctx, "prev").await?;
            }
            EntityCommand::MediaNextTrack => {
                self.post_button(ctx, "next").await?;
            }
            other => {
                warn!(entity_id = %self.entity_id, ?other, "unsupported command");
                return Ok(false);
            }
        }
        Ok(true)
    }
}
