//! Sensor entities: hub readings, smart-meter power and energy, and a
//! diagnostic sensor exposing the remaining API quota.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use super::entity::NatureEntity;
use super::entity::PollUpdate;
use super::entity::Resolution;
use super::models::Appliance;
use super::models::Device;
use super::rate_limit::RateLimit;
use crate::engine::Entity;
use crate::engine::Platform;

/// Meters report about once a minute; a reading older than this means the
/// meter link is down even if the appliance record is still served.
const METER_STALE_AFTER: TimeDelta = TimeDelta::seconds(125);

/// ECHONET code for instantaneous power.
pub const EPC_POWER: u8 = 231;

/// ECHONET codes for cumulative energy, normal and reverse direction.
pub const EPC_ENERGY_NORMAL: u8 = 224;
pub const EPC_ENERGY_REVERSE: u8 = 227;

const EPC_COEFFICIENT: u8 = 211;
const EPC_ENERGY_UNIT: u8 = 225;

/// Multiplier for cumulative energy values, keyed by the unit property.
fn energy_unit_multiplier(unit: i64) -> Option<f64> {
    match unit {
        0x00 => Some(1.0),
        0x01 => Some(0.1),
        0x02 => Some(0.01),
        0x03 => Some(0.001),
        0x04 => Some(0.0001),
        0x0A => Some(10.0),
        0x0B => Some(100.0),
        0x0C => Some(1000.0),
        0x0D => Some(10000.0),
        _ => None,
    }
}

/// A reading from a hub's built-in sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoReading {
    Temperature,
    Humidity,
    Illuminance,
}

impl RemoReading {
    /// Key in the hub's `newest_events` map.
    pub fn event_key(&self) -> &'static str {
        match self {
            Self::Temperature => "te",
            Self::Humidity => "hu",
            Self::Illuminance => "il",
        }
    }

    fn device_class(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Illuminance => "illuminance",
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
            Self::Illuminance => "lx",
        }
    }
}

/// Temperature, humidity or illuminance from a hub.
pub struct RemoSensor {
    entity_id: String,
    device_id: String,
    name: String,
    reading: RemoReading,
    available: bool,
    value: Option<f64>,
}

impl RemoSensor {
    pub fn new(device: &Device, reading: RemoReading) -> Self {
        Self {
            entity_id: format!("sensor.{}-{}", device.id, reading.event_key()),
            device_id: device.id.clone(),
            name: format!("{} {}", device.name, reading.device_class()),
            reading,
            available: false,
            value: None,
        }
    }
}

impl Entity for RemoSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state_json(&self) -> serde_json::Value {
        json!({
            "value": self.value,
            "unit": self.reading.unit(),
            "device_class": self.reading.device_class(),
            "state_class": "measurement",
        })
    }
}

#[async_trait]
impl NatureEntity for RemoSensor {
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
                let value = device
                    .newest_events
                    .get(self.reading.event_key())
                    .map(|e| e.val);
                let available = value.is_some();
                let changed = available != self.available || value != self.value;
                self.available = available;
                self.value = value;
                changed
            }
        }
    }
}

/// Which smart-meter property a sensor publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterKind {
    /// Instantaneous power in watts.
    Power,

    /// Cumulative energy in kWh, derived from the raw counter, the
    /// coefficient and the unit properties.
    Energy { epc: u8 },
}

pub struct SmartMeterSensor {
    entity_id: String,
    appliance_id: String,
    device_id: String,
    name: String,
    kind: MeterKind,
    available: bool,
    value: Option<f64>,
    updated_at: Option<DateTime<Utc>>,
}

impl SmartMeterSensor {
    pub fn new(appliance: &Appliance, kind: MeterKind) -> Self {
        let (epc, name) = match kind {
            MeterKind::Power => (EPC_POWER, format!("{} instantaneous", appliance.nickname)),
            MeterKind::Energy { epc } => {
                // Leading word of the property name tells the direction
                // ("normal" or "reverse").
                let direction = appliance
                    .echonet_property(epc)
                    .map(|p| p.name.split('_').next().unwrap_or("").to_string())
                    .unwrap_or_default();
                (epc, format!("{} {} cumulative", appliance.nickname, direction))
            }
        };

        let mut sensor = Self {
            entity_id: format!("sensor.{}-{}", appliance.id, epc),
            appliance_id: appliance.id.clone(),
            device_id: appliance.device.id.clone(),
            name,
            kind,
            available: false,
            value: None,
            updated_at: None,
        };
        sensor.read(appliance, Utc::now());
        sensor
    }

    fn read(&mut self, appliance: &Appliance, now: DateTime<Utc>) {
        self.updated_at = appliance.smart_meter_updated_at();
        self.value = match self.kind {
            MeterKind::Power => appliance
                .echonet_property(EPC_POWER)
                .and_then(|p| p.val.parse().ok()),
            MeterKind::Energy { epc } => compute_energy(appliance, epc),
        };

        // Served from cache does not mean alive: a reading older than the
        // staleness window marks the meter unavailable.
        self.available = self.value.is_some()
            && self
                .updated_at
                .is_some_and(|t| t >= now - METER_STALE_AFTER);
    }
}

/// Cumulative energy in kWh, or `None` when any input property is missing
/// or malformed.
fn compute_energy(appliance: &Appliance, epc: u8) -> Option<f64> {
    let cumulative: i64 = appliance.echonet_property(epc)?.val.parse().ok()?;
    let coefficient: i64 = appliance.echonet_property(EPC_COEFFICIENT)?.val.parse().ok()?;
    let unit: i64 = appliance.echonet_property(EPC_ENERGY_UNIT)?.val.parse().ok()?;
    let multiplier = energy_unit_multiplier(unit);
    if multiplier.is_none() {
        warn!(appliance_id = %appliance.id, unit, "unknown cumulative energy unit");
    }
    Some(cumulative as f64 * coefficient as f64 * multiplier?)
}

impl Entity for SmartMeterSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state_json(&self) -> serde_json::Value {
        let (device_class, unit, state_class) = match self.kind {
            MeterKind::Power => ("power", "W", "measurement"),
            MeterKind::Energy { .. } => ("energy", "kWh", "total_increasing"),
        };
        json!({
            "value": self.value,
            "unit": unit,
            "device_class": device_class,
            "state_class": state_class,
            "updated_at": self.updated_at.map(|t| t.to_rfc3339()),
        })
    }
}

#[async_trait]
impl NatureEntity for SmartMeterSensor {
    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn on_appliances(&mut self, update: &PollUpdate<'_, Appliance>, now: DateTime<Utc>) -> bool {
        match update.resolve(&self.appliance_id) {
            Resolution::Unchanged => false,
            Resolution::Unavailable => {
                let was = self.available;
                self.available = false;
                was
            }
            Resolution::Available(appliance) => {
                self.read(appliance, now);
                true
            }
        }
    }
}

/// Diagnostic sensor publishing the remaining API quota.
pub struct RateLimitSensor {
    available: bool,
    remaining: Option<i64>,
    reset: Option<DateTime<Utc>>,
}

impl RateLimitSensor {
    pub const ENTITY_ID: &'static str = "sensor.rate-limit-remaining";

    pub fn new() -> Self {
        Self {
            available: false,
            remaining: None,
            reset: None,
        }
    }
}

impl Default for RateLimitSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Entity for RateLimitSensor {
    fn entity_id(&self) -> &str {
        Self::ENTITY_ID
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn name(&self) -> &str {
        "Rate Limit"
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state_json(&self) -> serde_json::Value {
        json!({
            "value": self.remaining,
            "state_class": "measurement",
            "entity_category": "diagnostic",
            "icon": "mdi:api",
            "reset": self.reset.map(|t| t.to_rfc3339()),
        })
    }
}

#[async_trait]
impl NatureEntity for RateLimitSensor {
    fn on_rate_limit(&mut self, limit: Option<RateLimit>) -> bool {
        let (remaining, reset) = match limit {
            Some(limit) => (Some(limit.remaining), Some(limit.reset)),
            None => (None, None),
        };
        let changed = remaining != self.remaining || reset != self.reset;
        self.available = remaining.is_some();
        self.remaining = remaining;
        self.reset = reset;
        changed
    }
}
