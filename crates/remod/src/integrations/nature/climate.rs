//! Air conditioner entity.
//!
//! Settings changes are debounced: rapid command bursts (mode + temperature
//! from one UI interaction) merge into a single API call fired 100ms after
//! the last change.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use tracing::warn;

use super::client::ApiError;
use super::entity::CommandContext;
use super::entity::DebounceFire;
use super::entity::NatureEntity;
use super::entity::PollUpdate;
use super::entity::Resolution;
use super::entity::format_decimal;
use super::models::AirconModeRange;
use super::models::AirconSettings;
use super::models::Appliance;
use super::models::Device;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::HvacMode;
use crate::engine::Platform;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Target temperature used when switching into a mode that has no
/// remembered setting yet.
const DEFAULT_TARGET_TEMP: f64 = 23.0;

fn vendor_mode(mode: HvacMode) -> &'static str {
    match mode {
        HvacMode::Auto => "auto",
        HvacMode::FanOnly => "blow",
        HvacMode::Cool => "cool",
        HvacMode::Dry => "dry",
        HvacMode::Heat => "warm",
        HvacMode::Off => "power-off",
    }
}

fn hvac_mode(vendor: &str) -> Option<HvacMode> {
    match vendor {
        "auto" => Some(HvacMode::Auto),
        "blow" => Some(HvacMode::FanOnly),
        "cool" => Some(HvacMode::Cool),
        "dry" => Some(HvacMode::Dry),
        "warm" => Some(HvacMode::Heat),
        "power-off" => Some(HvacMode::Off),
        _ => None,
    }
}

pub struct AirconEntity {
    entity_id: String,
    appliance_id: String,
    device_id: String,
    name: String,
    available: bool,

    /// Supported settings per vendor mode, from the appliance's range block.
    modes: HashMap<String, AirconModeRange>,

    /// Vendor mode, retained even while the unit is off so temperature
    /// ranges stay meaningful.
    remo_mode: Option<String>,

    hvac_mode: Option<HvacMode>,
    target_temperature: Option<f64>,

    /// Last target temperature seen per vendor mode, restored when
    /// switching back into that mode.
    last_target_temperature: HashMap<String, String>,

    fan_mode: Option<String>,
    swing_mode: Option<String>,
    temperature_unit: String,
    current_temperature: Option<f64>,
    current_humidity: Option<i64>,
    updated_at: Option<DateTime<Utc>>,

    pending: Option<HashMap<String, String>>,
    generation: u64,
    debounce_task: Option<JoinHandle<()>>,
}

impl AirconEntity {
    pub fn new(appliance: &Appliance) -> Self {
        let modes = appliance
            .aircon
            .as_ref()
            .map(|a| a.range.modes.clone())
            .unwrap_or_default();

        let mut entity = Self {
            entity_id: format!("climate.{}", appliance.id),
            appliance_id: appliance.id.clone(),
            device_id: appliance.device.id.clone(),
            name: appliance.nickname.clone(),
            available: false,
            modes,
            remo_mode: None,
            hvac_mode: None,
            target_temperature: None,
            last_target_temperature: HashMap::new(),
            fan_mode: None,
            swing_mode: None,
            temperature_unit: "celsius".to_string(),
            current_temperature: None,
            current_humidity: None,
            updated_at: None,
            pending: None,
            generation: 0,
            debounce_task: None,
        };
        if let Some(settings) = &appliance.settings {
            entity.available = true;
            entity.apply_settings(settings);
        }
        entity
    }

    fn apply_settings(&mut self, settings: &AirconSettings) {
        self.remo_mode = Some(settings.mode.clone());
        match settings.temp.parse::<f64>() {
            Ok(temp) => {
                self.target_temperature = Some(temp);
                self.last_target_temperature
                    .insert(settings.mode.clone(), settings.temp.clone());
            }
            Err(_) => self.target_temperature = None,
        }

        self.hvac_mode = if settings.button == "power-off" {
            Some(HvacMode::Off)
        } else {
            hvac_mode(&settings.mode)
        };

        self.fan_mode = Some(settings.vol.clone()).filter(|v| !v.is_empty());
        self.swing_mode = Some(settings.dir.clone()).filter(|d| !d.is_empty());
        self.temperature_unit = match settings.temp_unit.as_str() {
            "f" => "fahrenheit".to_string(),
            _ => "celsius".to_string(),
        };
        self.updated_at = settings.updated_at;
    }

    /// Selectable temperatures for the current vendor mode, as numbers.
    fn current_mode_temp_range(&self) -> Vec<f64> {
        let Some(mode) = &self.remo_mode else {
            return Vec::new();
        };
        self.modes
            .get(mode)
            .map(|range| {
                range
                    .temp
                    .iter()
                    .filter(|t| !t.is_empty())
                    .filter_map(|t| t.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn target_temperature_step(&self) -> f64 {
        let range = self.current_mode_temp_range();
        if range.len() >= 2 {
            let step = ((range[1] - range[0]) * 10.0).round() / 10.0;
            if step == 1.0 || step == 0.5 {
                return step;
            }
        }
        1.0
    }

    fn hvac_modes(&self) -> Vec<String> {
        let mut modes: Vec<String> = self
            .modes
            .keys()
            .filter_map(|m| hvac_mode(m))
            .map(|m| m.to_string())
            .collect();
        modes.push(HvacMode::Off.to_string());
        modes.sort();
        modes.dedup();
        modes
    }

    fn mode_list(&self, pick: fn(&AirconModeRange) -> &Vec<String>) -> Vec<String> {
        self.remo_mode
            .as_ref()
            .and_then(|m| self.modes.get(m))
            .map(|range| pick(range).iter().filter(|v| !v.is_empty()).cloned().collect())
            .unwrap_or_default()
    }

    /// Merge settings into the pending buffer and (re)arm the debounce.
    fn queue_settings(&mut self, ctx: &CommandContext, data: HashMap<String, String>) {
        match &mut self.pending {
            Some(pending) => pending.extend(data),
            None => self.pending = Some(data),
        }

        self.generation += 1;
        if let Some(task) = self.debounce_task.take() {
            task.abort();
        }

        let fire = DebounceFire {
            entity_id: self.entity_id.clone(),
            generation: self.generation,
        };
        let tx = ctx.debounce_tx.clone();
        self.debounce_task = Some(tokio::spawn(async move {
            sleep(DEBOUNCE).await;
            let _ = tx.send(fire);
        }));
    }
}

impl Entity for AirconEntity {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::Climate
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state_json(&self) -> serde_json::Value {
        let range = self.current_mode_temp_range();
        json!({
            "hvac_mode": self.hvac_mode.map(|m| m.to_string()),
            "hvac_modes": self.hvac_modes(),
            "target_temperature": self.target_temperature,
            "min_temp": range.iter().cloned().reduce(f64::min),
            "max_temp": range.iter().cloned().reduce(f64::max),
            "target_temperature_step": self.target_temperature_step(),
            "fan_mode": self.fan_mode,
            "fan_modes": self.mode_list(|r| &r.vol),
            "swing_mode": self.swing_mode,
            "swing_modes": self.mode_list(|r| &r.dir),
            "current_temperature": self.current_temperature,
            "current_humidity": self.current_humidity,
            "temperature_unit": self.temperature_unit,
            "previous_target_temperature": self.last_target_temperature,
            "updated_at": self.updated_at.map(|t| t.to_rfc3339()),
        })
    }
}

#[async_trait]
impl NatureEntity for AirconEntity {
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
                if let Some(aircon) = &appliance.aircon {
                    self.modes = aircon.range.modes.clone();
                }
                if let Some(settings) = &appliance.settings {
                    self.apply_settings(settings);
                }
                true
            }
        }
    }

    fn on_devices(&mut self, update: &PollUpdate<'_, Device>, _now: DateTime<Utc>) -> bool {
        let Resolution::Available(device) = update.resolve(&self.device_id) else {
            return false;
        };
        let temperature = device.newest_events.get("te").map(|e| e.val);
        let humidity = device.newest_events.get("hu").map(|e| e.val as i64);
        let changed =
            temperature != self.current_temperature || humidity != self.current_humidity;
        self.current_temperature = temperature;
        self.current_humidity = humidity;
        changed
    }

    async fn handle_command(
        &mut self,
        ctx: &CommandContext,
        command: EntityCommand,
    ) -> Result<bool, ApiError> {
        let mut data = HashMap::new();
        match command {
            EntityCommand::SetTemperature { temperature } => {
                data.insert("temperature".to_string(), format_decimal(temperature));
            }
            EntityCommand::SetHvacMode { mode } => {
                let vendor = vendor_mode(mode);
                if mode == HvacMode::Off {
                    data.insert("button".to_string(), vendor.to_string());
                } else {
                    data.insert("operation_mode".to_string(), vendor.to_string());
                    let temperature = self
                        .last_target_temperature
                        .get(vendor)
                        .cloned()
                        .unwrap_or_else(|| format_decimal(DEFAULT_TARGET_TEMP));
                    data.insert("temperature".to_string(), temperature);
                }
            }
            EntityCommand::SetFanMode { mode } => {
                data.insert("air_volume".to_string(), mode);
            }
            EntityCommand::SetSwingMode { mode } => {
                data.insert("air_direction".to_string(), mode);
            }
            other => {
                warn!(entity_id = %self.entity_id, ?other, "unsupported command");
                return Ok(false);
            }
        }

        debug!(entity_id = %self.entity_id, ?data, "queueing settings");
        self.queue_settings(ctx, data);
        Ok(false)
    }

    async fn handle_debounce(
        &mut self,
        ctx: &CommandContext,
        generation: u64,
    ) -> Result<bool, ApiError> {
        if generation != self.generation {
            return Ok(false);
        }
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };
        self.debounce_task = None;

        let mut form: Vec<(String, String)> = pending.into_iter().collect();
        form.sort();
        let path = format!("appliances/{}/aircon_settings", self.appliance_id);
        let response = ctx.client.post(&path, &form).await?;
        let settings: AirconSettings = serde_json::from_value(response)?;
        self.apply_settings(&settings);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::integrations::nature::client::testing::MockTransport;
    use crate::integrations::nature::client::testing::client_with;

    fn aircon_appliance() -> Appliance {
        serde_json::from_str(
            r#"{
                "id": "a1",
                "nickname": "Bedroom AC",
                "type": "AC",
                "device": { "id": "d1" },
                "aircon": {
                    "range": {
                        "modes": {
                            "cool": { "temp": ["18", "19", "20", "21"], "vol": ["1", "auto"], "dir": ["", "swing"] },
                            "warm": { "temp": ["20", "20.5", "21"], "vol": ["auto"], "dir": [""] }
                        }
                    }
                },
                "settings": {
                    "mode": "cool",
                    "temp": "20",
                    "temp_unit": "c",
                    "vol": "auto",
                    "dir": "",
                    "button": "",
                    "updated_at": "2024-01-01T00:00:00Z"
                }
            }"#,
        )
        .unwrap()
    }

    fn context(transport: Arc<MockTransport>) -> (CommandContext, mpsc::UnboundedReceiver<DebounceFire>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CommandContext {
                client: Arc::new(client_with(transport)),
                debounce_tx: tx,
            },
            rx,
        )
    }

    #[test]
    fn settings_feed_state() {
        let entity = AirconEntity::new(&aircon_appliance());
        assert!(entity.available());
        let state = entity.state_json();
        assert_eq!(state["hvac_mode"], "cool");
        assert_eq!(state["target_temperature"], 20.0);
        assert_eq!(state["fan_mode"], "auto");
        assert_eq!(
            state["hvac_modes"],
            serde_json::json!(["cool", "heat", "off"])
        );
    }

    #[test]
    fn power_off_button_overrides_mode() {
        let mut appliance = aircon_appliance();
        appliance.settings.as_mut().unwrap().button = "power-off".to_string();
        let entity = AirconEntity::new(&appliance);
        assert_eq!(entity.state_json()["hvac_mode"], "off");
    }

    #[test]
    fn step_follows_temperature_grid() {
        let mut entity = AirconEntity::new(&aircon_appliance());
        assert_eq!(entity.target_temperature_step(), 1.0);

        entity.remo_mode = Some("warm".to_string());
        assert_eq!(entity.target_temperature_step(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_commands_posts_once_with_merged_settings() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            r#"{ "mode": "warm", "temp": "21", "temp_unit": "c", "vol": "auto", "dir": "", "button": "", "updated_at": "2024-01-01T00:00:10Z" }"#,
        );
        let (ctx, mut rx) = context(transport.clone());
        let mut entity = AirconEntity::new(&aircon_appliance());

        entity
            .handle_command(&ctx, EntityCommand::SetHvacMode { mode: HvacMode::Heat })
            .await
            .unwrap();
        entity
            .handle_command(
                &ctx,
                EntityCommand::SetTemperature { temperature: 21.0 },
            )
            .await
            .unwrap();

        // Only the second timer survives the rearm.
        let fire = rx.recv().await.unwrap();
        assert_eq!(fire.generation, entity.generation);
        assert!(rx.try_recv().is_err());

        let changed = entity.handle_debounce(&ctx, fire.generation).await.unwrap();
        assert!(changed);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with("appliances/a1/aircon_settings"));
        assert_eq!(
            requests[0].form,
            vec![
                ("operation_mode".to_string(), "warm".to_string()),
                ("temperature".to_string(), "21".to_string()),
            ]
        );
        assert_eq!(entity.state_json()["hvac_mode"], "heat");
        assert_eq!(entity.state_json()["target_temperature"], 21.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_debounce_generation_is_dropped() {
        let transport = Arc::new(MockTransport::new());
        let (ctx, _rx) = context(transport.clone());
        let mut entity = AirconEntity::new(&aircon_appliance());

        entity
            .handle_command(
                &ctx,
                EntityCommand::SetTemperature { temperature: 19.0 },
            )
            .await
            .unwrap();
        let stale = entity.generation;
        entity
            .handle_command(
                &ctx,
                EntityCommand::SetTemperature { temperature: 18.0 },
            )
            .await
            .unwrap();

        let changed = entity.handle_debounce(&ctx, stale).await.unwrap();
        assert!(!changed);
        assert!(transport.requests().is_empty());
        assert!(entity.pending.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn turning_off_sends_the_power_button() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            r#"{ "mode": "cool", "temp": "20", "temp_unit": "c", "vol": "auto", "dir": "", "button": "power-off", "updated_at": "2024-01-01T00:00:10Z" }"#,
        );
        let (ctx, mut rx) = context(transport.clone());
        let mut entity = AirconEntity::new(&aircon_appliance());

        entity
            .handle_command(&ctx, EntityCommand::SetHvacMode { mode: HvacMode::Off })
            .await
            .unwrap();
        let fire = rx.recv().await.unwrap();
        entity.handle_debounce(&ctx, fire.generation).await.unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests[0].form,
            vec![("button".to_string(), "power-off".to_string())]
        );
        assert_eq!(entity.state_json()["hvac_mode"], "off");
    }

    #[test]
    fn quota_blocked_poll_leaves_state_alone() {
        let mut entity = AirconEntity::new(&aircon_appliance());
        let records = HashMap::new();
        let update = PollUpdate {
            success: false,
            quota_exhausted: true,
            records: &records,
        };
        assert!(!entity.on_appliances(&update, Utc::now()));
        assert!(entity.available());
    }

    #[test]
    fn failed_poll_marks_unavailable() {
        let mut entity = AirconEntity::new(&aircon_appliance());
        let records = HashMap::new();
        let update = PollUpdate {
            success: false,
            quota_exhausted: false,
            records: &records,
        };
        assert!(entity.on_appliances(&update, Utc::now()));
        assert!(!entity.available());
    }

    #[test]
    fn device_readings_update_current_values() {
        let mut entity = AirconEntity::new(&aircon_appliance());
        let device: Device = serde_json::from_str(
            r#"{
                "id": "d1",
                "name": "Hub",
                "mac_address": "m",
                "firmware_version": "Remo/1.0",
                "newest_events": {
                    "te": { "val": 21.5, "created_at": "2024-01-01T00:00:00Z" },
                    "hu": { "val": 48, "created_at": "2024-01-01T00:00:00Z" }
                }
            }"#,
        )
        .unwrap();
        let mut records = HashMap::new();
        records.insert("d1".to_string(), device);
        let update = PollUpdate {
            success: true,
            quota_exhausted: false,
            records: &records,
        };

        assert!(entity.on_devices(&update, Utc::now()));
        let state = entity.state_json();
        assert_eq!(state["current_temperature"], 21.5);
        assert_eq!(state["current_humidity"], 48);

        // Same readings again: nothing to publish.
        assert!(!entity.on_devices(&update, Utc::now()));
    }
}
