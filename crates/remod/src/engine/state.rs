use std::collections::HashMap;

use serde::Serialize;
use strum::Display;
use strum::EnumString;

use super::device::Device;

/// Entity platforms known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Button,
    Climate,
    MediaPlayer,
    Number,
    Remote,
    Sensor,
}

/// HVAC operating modes, in the engine's vocabulary.
///
/// Integrations translate these to and from whatever the vendor speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HvacMode {
    Auto,
    Cool,
    Dry,
    FanOnly,
    Heat,
    Off,
}

/// State of one entity as last reported by its integration.
#[derive(Debug, Clone)]
pub struct EntityState {
    pub platform: Platform,

    /// Human-readable name reported at discovery.
    pub name: String,

    /// Whether the backing integration currently considers the entity live.
    pub available: bool,

    /// Platform-specific attributes, serialized by the entity itself.
    pub state: serde_json::Value,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub entities: HashMap<String, EntityState>,

    /// Device registry, keyed by the integration-assigned device id.
    pub devices: HashMap<String, Device>,
}
