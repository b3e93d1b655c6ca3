//! One button entity per stored IR signal. Buttons are fire-and-forget and
//! always available.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::client::ApiError;
use super::entity::CommandContext;
use super::entity::NatureEntity;
use super::icons::signal_icon;
use super::models::Signal;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::Platform;

pub struct SignalButton {
    entity_id: String,
    signal_id: String,
    device_id: String,
    name: String,
    icon: Option<&'static str>,
}

impl SignalButton {
    pub fn new(signal: &Signal, device_id: &str) -> Self {
        Self {
            entity_id: format!("button.{}", signal.id),
            signal_id: signal.id.clone(),
            device_id: device_id.to_string(),
            name: signal.name.clone(),
            icon: signal_icon(&signal.image),
        }
    }
}

impl Entity for SignalButton {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::Button
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        true
    }

    fn state_json(&self) -> serde_json::Value {
        json!({
            "icon": self.icon,
        })
    }
}

#[async_trait]
impl NatureEntity for SignalButton {
    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    async fn handle_command(
        &mut self,
        ctx: &CommandContext,
        command: EntityCommand,
    ) -> Result<bool, ApiError> {
        if !matches!(command, EntityCommand::Press) {
            warn!(entity_id = %self.entity_id, ?command, "unsupported command");
            return Ok(false);
        }
        let path = format!("signals/{}/send", self.signal_id);
        ctx.client.post(&path, &[]).await?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::integrations::nature::client::testing::MockTransport;
    use crate::integrations::nature::client::testing::client_with;

    fn signal() -> Signal {
        serde_json::from_str(r#"{ "id": "s1", "name": "power", "image": "ico_io" }"#).unwrap()
    }

    #[tokio::test]
    async fn press_sends_the_signal() {
        let transport = Arc::new(MockTransport::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = CommandContext {
            client: Arc::new(client_with(transport.clone())),
            debounce_tx: tx,
        };
        let mut button = SignalButton::new(&signal(), "d1");

        button.handle_command(&ctx, EntityCommand::Press).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with("signals/s1/send"));
        assert!(button.available());
        assert_eq!(button.state_json()["icon"], "mdi:power");
    }
}
