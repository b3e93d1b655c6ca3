//! Hub calibration offsets exposed as configurable numbers.

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
use super::entity::format_decimal;
use super::icons::offset_icon;
use super::models::Device;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetKind {
    Temperature,
    Humidity,
}

impl OffsetKind {
    /// Field name on the device record, also the POST path segment.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature_offset",
            Self::Humidity => "humidity_offset",
        }
    }

    fn range(&self) -> f64 {
        match self {
            Self::Temperature => 5.0,
            Self::Humidity => 20.0,
        }
    }

    fn step(&self) -> f64 {
        match self {
            Self::Temperature => 0.5,
            Self::Humidity => 5.0,
        }
    }

    pub fn value_of(&self, device: &Device) -> Option<f64> {
        match self {
            Self::Temperature => device.temperature_offset,
            Self::Humidity => device.humidity_offset,
        }
    }
}

pub struct OffsetEntity {
    entity_id: String,
    device_id: String,
    kind: OffsetKind,
    available: bool,
    value: Option<f64>,
}

impl OffsetEntity {
    pub fn new(device: &Device, kind: OffsetKind) -> Self {
        Self {
            entity_id: format!("number.{}_{}", device.id, kind.key()),
            device_id: device.id.clone(),
            kind,
            available: false,
            value: kind.value_of(device),
        }
    }
}

impl Entity for OffsetEntity {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::Number
    }

    fn name(&self) -> &str {
        self.kind.key()
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state_json(&self) -> serde_json::Value {
        json!({
            "value": self.value,
            "min": -self.kind.range(),
            "max": self.kind.range(),
            "step": self.kind.step(),
            "mode": "box",
            "entity_category": "config",
            "icon": offset_icon(self.kind.key()),
        })
    }
}

#[async_trait]
impl NatureEntity for OffsetEntity {
    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn on_devices(&mut self, update: &PollUpdate<'_, Device>, _now: DateTime<Utc>) -> bool {
        match update.resolve(&self.device_id) {
            Resolution::Unchanged => false,
            Resolution::Unavailable => {
                let was = self.available;
                self.available = false;
                was
            }
            Resolution::Available(device) => {
                let value = self.kind.value_of(device);
                let changed = !self.available || value != self.value;
                self.available = true;
                self.value = value;
                changed
            }
        }
    }

    async fn handle_command(
        &mut self,
        ctx: &CommandContext,
        command: EntityCommand,
    ) -> Result<bool, ApiError> {
        let EntityCommand::SetValue { value } = command else {
            warn!(entity_id = %self.entity_id, ?command, "unsupported command");
            return Ok(false);
        };

        let path = format!("devices/{}/{}", self.device_id, self.kind.key());
        let form = vec![("offset".to_string(), format_decimal(value))];
        ctx.client.post(&path, &form).await?;
        self.value = Some(value);
        Ok(true)
    }
}
