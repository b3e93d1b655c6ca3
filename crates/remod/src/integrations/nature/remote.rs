//! Remote entity wrapping IR appliances, plus the richer TV and light
//! appliances which expose named buttons next to their stored signals.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::json;
use tokio::time::sleep;
use tracing::warn;

use super::client::ApiError;
use super::entity::CommandContext;
use super::entity::NatureEntity;
use super::entity::PollUpdate;
use super::entity::Resolution;
use super::models::Appliance;
use super::models::ApplianceButton;
use super::models::LightButtonState;
use super::models::Signal;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::Platform;

/// Light activities surfaced to the user; every other button stays a plain
/// command.
const ACTIVITY_FILTER: [&str; 1] = ["night"];

/// Button names tried in order when turning on.
const ON_BUTTONS: [&str; 5] = ["on", "on-favorite", "on-100", "onoff", "power"];

/// Button names tried in order when turning off.
const OFF_BUTTONS: [&str; 3] = ["off", "onoff", "power"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    Ir,
    Tv,
    Light,
}

impl RemoteKind {
    /// API facet path for button posts, where one exists.
    fn facet(&self) -> Option<&'static str> {
        match self {
            Self::Ir => None,
            Self::Tv => Some("tv"),
            Self::Light => Some("light"),
        }
    }

    fn icon(&self) -> Option<&'static str> {
        match self {
            Self::Ir => None,
            Self::Tv => Some("mdi:television"),
            Self::Light => Some("hass:lightbulb"),
        }
    }
}

pub struct RemoteEntity {
    entity_id: String,
    appliance_id: String,
    device_id: String,
    name: String,
    kind: RemoteKind,
    available: bool,
    signals: Vec<Signal>,
    buttons: Vec<ApplianceButton>,
    is_on: Option<bool>,
    current_activity: Option<String>,
}

impl RemoteEntity {
    pub fn new(appliance: &Appliance, kind: RemoteKind) -> Self {
        let mut entity = Self {
            entity_id: format!("remote.{}", appliance.id),
            appliance_id: appliance.id.clone(),
            device_id: appliance.device.id.clone(),
            name: appliance.nickname.clone(),
            kind,
            available: false,
            signals: Vec::new(),
            buttons: Vec::new(),
            is_on: None,
            current_activity: None,
        };
        entity.read(appliance);
        entity.available = true;
        entity
    }

    fn read(&mut self, appliance: &Appliance) {
        self.signals = appliance.signals.clone();
        match self.kind {
            RemoteKind::Tv => {
                if let Some(tv) = &appliance.tv {
                    self.buttons = tv.buttons.clone();
                }
            }
            RemoteKind::Light => {
                if let Some(light) = &appliance.light {
                    self.buttons = light.buttons.clone();
                    let state = light.state.clone();
                    self.apply_light_state(&state);
                }
            }
            RemoteKind::Ir => {}
        }
    }

    fn apply_light_state(&mut self, state: &LightButtonState) {
        match state.power.as_str() {
            "on" => self.is_on = Some(true),
            "off" => self.is_on = Some(false),
            _ => {}
        }
        self.current_activity = ACTIVITY_FILTER
            .contains(&state.last_button.as_str())
            .then(|| state.last_button.clone());
    }

    fn activity_list(&self) -> Vec<String> {
        self.buttons
            .iter()
            .filter(|b| ACTIVITY_FILTER.contains(&b.name.as_str()))
            .map(|b| b.name.clone())
            .collect()
    }

    fn has_button(&self, name: &str) -> bool {
        self.buttons.iter().any(|b| b.name == name)
    }

    /// POST a facet button and fold any light state in the response back in.
    async fn post_button(&mut self, ctx: &CommandContext, button: &str) -> Result<(), ApiError> {
        let Some(facet) = self.kind.facet() else {
            return Ok(());
        };
        let path = format!("appliances/{}/{}", self.appliance_id, facet);
        let form = vec![("button".to_string(), button.to_string())];
        let response = ctx.client.post(&path, &form).await?;
        if self.kind == RemoteKind::Light {
            if let Ok(state) = serde_json::from_value::<LightButtonState>(response) {
                self.apply_light_state(&state);
            }
        }
        Ok(())
    }

    /// Send the activity button, or the first preferred power button the
    /// appliance has. Returns whether anything was sent.
    async fn send_power_button(
        &mut self,
        ctx: &CommandContext,
        activity: Option<&str>,
        preferences: &[&str],
    ) -> Result<bool, ApiError> {
        if self.kind.facet().is_none() {
            return Ok(false);
        }
        if let Some(activity) = activity {
            self.post_button(ctx, activity).await?;
            return Ok(true);
        }
        let Some(button) = preferences.iter().find(|b| self.has_button(b)) else {
            return Ok(false);
        };
        let button = button.to_string();
        self.post_button(ctx, &button).await?;
        Ok(true)
    }

    /// Fall back to stored signals for appliances without a power button:
    /// a dedicated on/off signal if one exists, else the toggle signal.
    async fn send_power_signal(
        &mut self,
        ctx: &CommandContext,
        image: &str,
    ) -> Result<(), ApiError> {
        let signal = self
            .signals
            .iter()
            .find(|s| s.image == image)
            .or_else(|| self.signals.iter().find(|s| s.image == "ico_io"));
        if let Some(signal) = signal {
            let path = format!("signals/{}/send", signal.id);
            ctx.client.post(&path, &[]).await?;
        }
        Ok(())
    }

    async fn send_one(&mut self, ctx: &CommandContext, id: &str) -> Result<(), ApiError> {
        if self.kind.facet().is_some() && self.has_button(id) {
            return self.post_button(ctx, id).await;
        }

        let path = format!("signals/{id}/send");
        ctx.client.post(&path, &[]).await?;

        // Power-ish signals imply a state change we track optimistically.
        let image = self.signals.iter().find(|s| s.id == id).map(|s| s.image.as_str());
        match image {
            Some("ico_on") => self.is_on = Some(true),
            Some("ico_off") => self.is_on = Some(false),
            Some("ico_io") => self.is_on = Some(!self.is_on.unwrap_or(false)),
            _ => {}
        }
        Ok(())
    }
}

impl Entity for RemoteEntity {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::Remote
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state_json(&self) -> serde_json::Value {
        json!({
            "is_on": self.is_on,
            "activity_list": self.activity_list(),
            "current_activity": self.current_activity,
            "signals": self.signals,
            "buttons": self.buttons.iter().map(|b| b.name.clone()).collect::<Vec<_>>(),
            "icon": self.kind.icon(),
        })
    }
}

#[async_trait]
impl NatureEntity for RemoteEntity {
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
            EntityCommand::TurnOn { activity } => {
                let sent = self
                    .send_power_button(ctx, activity.as_deref(), &ON_BUTTONS)
                    .await?;
                if sent {
                    self.is_on = Some(true);
                } else {
                    self.send_power_signal(ctx, "ico_on").await?;
                    self.is_on = Some(true);
                    if self.kind == RemoteKind::Light {
                        self.current_activity = None;
                    }
                }
                Ok(true)
            }
            EntityCommand::TurnOff => {
                let sent = self.send_power_button(ctx, None, &OFF_BUTTONS).await?;
                if sent {
                    self.is_on = Some(false);
                } else {
                    self.send_power_signal(ctx, "ico_off").await?;
                    self.is_on = Some(false);
                    if self.kind == RemoteKind::Light {
                        self.current_activity = None;
                    }
                }
                Ok(true)
            }
            EntityCommand::SendCommands {
                commands,
                delay,
                repeats,
            } => {
                let mut remaining = repeats.max(1);
                loop {
                    for id in &commands {
                        self.send_one(ctx, id).await?;
                    }
                    remaining -= 1;
                    if remaining == 0 {
                        break;
                    }
                    sleep(delay).await;
                }
                Ok(true)
            }
            EntityCommand::DeleteCommand { command } => {
                let path = format!("signals/{command}/delete");
                ctx.client.post(&path, &[]).await?;
                self.signals.retain(|s| s.id != command);
                Ok(true)
            }
            other => {
                warn!(entity_id = %self.entity_id, ?other, "unsupported command");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::integrations::nature::client::testing::MockTransport;
    use crate::integrations::nature::client::testing::client_with;

    fn ir_appliance() -> Appliance {
        serde_json::from_str(
            r#"{
                "id": "a1",
                "nickname": "Fan",
                "type": "IR",
                "device": { "id": "d1" },
                "signals": [
                    { "id": "s1", "name": "toggle", "image": "ico_io" },
                    { "id": "s2", "name": "speed", "image": "ico_plus" }
                ]
            }"#,
        )
        .unwrap()
    }

    fn light_appliance() -> Appliance {
        serde_json::from_str(
            r#"{
                "id": "a2",
                "nickname": "Ceiling",
                "type": "LIGHT",
                "device": { "id": "d1" },
                "light": {
                    "buttons": [
                        { "name": "onoff", "label": "" },
                        { "name": "night", "label": "" }
                    ],
                    "state": { "power": "off", "last_button": "" }
                },
                "signals": []
            }"#,
        )
        .unwrap()
    }

    fn context(transport: Arc<MockTransport>) -> CommandContext {
        // Remotes never arm debounce timers; the receiver can be dropped.
        let (tx, _rx) = mpsc::unbounded_channel();
        CommandContext {
            client: Arc::new(client_with(transport)),
            debounce_tx: tx,
        }
    }

    #[tokio::test]
    async fn ir_turn_off_falls_back_to_toggle_signal() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, "");
        let ctx = context(transport.clone());
        let mut entity = RemoteEntity::new(&ir_appliance(), RemoteKind::Ir);

        entity.handle_command(&ctx, EntityCommand::TurnOff).await.unwrap();

        let requests = transport.requests();
        assert!(requests[0].url.ends_with("signals/s1/send"));
        assert_eq!(entity.state_json()["is_on"], false);
    }

    #[tokio::test]
    async fn light_turn_on_uses_preferred_button() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, r#"{ "power": "on", "last_button": "onoff" }"#);
        let ctx = context(transport.clone());
        let mut entity = RemoteEntity::new(&light_appliance(), RemoteKind::Light);

        entity
            .handle_command(&ctx, EntityCommand::TurnOn { activity: None })
            .await
            .unwrap();

        let requests = transport.requests();
        assert!(requests[0].url.ends_with("appliances/a2/light"));
        assert_eq!(
            requests[0].form,
            vec![("button".to_string(), "onoff".to_string())]
        );
        assert_eq!(entity.state_json()["is_on"], true);
    }

    #[tokio::test]
    async fn light_activity_is_tracked() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, r#"{ "power": "on", "last_button": "night" }"#);
        let ctx = context(transport.clone());
        let mut entity = RemoteEntity::new(&light_appliance(), RemoteKind::Light);

        entity
            .handle_command(
                &ctx,
                EntityCommand::TurnOn {
                    activity: Some("night".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            transport.requests()[0].form,
            vec![("button".to_string(), "night".to_string())]
        );
        assert_eq!(entity.state_json()["current_activity"], "night");
        assert_eq!(entity.state_json()["activity_list"], json!(["night"]));
    }

    #[tokio::test(start_paused = true)]
    async fn send_commands_repeats_with_delay() {
        let transport = Arc::new(MockTransport::new());
        let ctx = context(transport.clone());
        let mut entity = RemoteEntity::new(&ir_appliance(), RemoteKind::Ir);

        entity
            .handle_command(
                &ctx,
                EntityCommand::SendCommands {
                    commands: vec!["s2".to_string()],
                    delay: Duration::from_secs(1),
                    repeats: 3,
                },
            )
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.url.ends_with("signals/s2/send")));
    }

    #[tokio::test]
    async fn toggle_signal_flips_assumed_state() {
        let transport = Arc::new(MockTransport::new());
        let ctx = context(transport.clone());
        let mut entity = RemoteEntity::new(&ir_appliance(), RemoteKind::Ir);

        entity
            .handle_command(
                &ctx,
                EntityCommand::SendCommands {
                    commands: vec!["s1".to_string()],
                    delay: Duration::ZERO,
                    repeats: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(entity.state_json()["is_on"], true);

        entity
            .handle_command(
                &ctx,
                EntityCommand::SendCommands {
                    commands: vec!["s1".to_string()],
                    delay: Duration::ZERO,
                    repeats: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(entity.state_json()["is_on"], false);
    }

    #[tokio::test]
    async fn delete_command_removes_signal() {
        let transport = Arc::new(MockTransport::new());
        let ctx = context(transport.clone());
        let mut entity = RemoteEntity::new(&ir_appliance(), RemoteKind::Ir);

        entity
            .handle_command(
                &ctx,
                EntityCommand::DeleteCommand {
                    command: "s2".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(transport.requests()[0].url.ends_with("signals/s2/delete"));
        assert_eq!(entity.signals.len(), 1);
    }
}
