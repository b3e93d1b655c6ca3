//! Typed views of the vendor API's JSON payloads.
//!
//! Only the fields the integration actually reads are modelled; the API
//! returns plenty more that serde simply skips.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A record that can be keyed into a poll result map.
pub trait Record {
    fn id(&self) -> &str;
}

/// One sensor reading from a hub's `newest_events` block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorEvent {
    pub val: f64,
    pub created_at: DateTime<Utc>,
}

/// A sensor-equipped hub unit, as returned by `GET /devices`.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub mac_address: String,
    pub firmware_version: String,

    #[serde(default)]
    pub temperature_offset: Option<f64>,

    #[serde(default)]
    pub humidity_offset: Option<f64>,

    /// Latest reading per event key: `te` (temperature), `hu` (humidity),
    /// `il` (illuminance), `mo` (motion).
    #[serde(default)]
    pub newest_events: HashMap<String, SensorEvent>,
}

impl Device {
    /// Model designation; the firmware version string leads with it.
    pub fn model_name(&self) -> &str {
        self.firmware_version
            .split('/')
            .next()
            .unwrap_or(&self.firmware_version)
    }
}

impl Record for Device {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Vendor appliance type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ApplianceKind {
    #[serde(rename = "AC")]
    Ac,
    #[serde(rename = "TV")]
    Tv,
    #[serde(rename = "LIGHT")]
    Light,
    #[serde(rename = "IR")]
    Ir,
    #[serde(rename = "EL_SMART_METER")]
    SmartMeter,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplianceDeviceRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplianceModel {
    pub name: String,
    pub manufacturer: String,
}

/// Supported settings for one aircon mode: selectable target temperatures,
/// fan volumes and swing directions. Empty strings stand for "unset".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AirconModeRange {
    #[serde(default)]
    pub temp: Vec<String>,

    #[serde(default)]
    pub vol: Vec<String>,

    #[serde(default)]
    pub dir: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirconRange {
    pub modes: HashMap<String, AirconModeRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Aircon {
    pub range: AirconRange,
}

/// Current aircon settings; also the response body of a settings POST.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AirconSettings {
    pub mode: String,

    #[serde(default)]
    pub temp: String,

    /// Temperature unit tag, `c` or `f`.
    #[serde(default)]
    pub temp_unit: String,

    #[serde(default)]
    pub vol: String,

    #[serde(default)]
    pub dir: String,

    /// Last pressed power button; `power-off` while the unit is off.
    #[serde(default)]
    pub button: String,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplianceButton {
    pub name: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TvState {
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TvFacet {
    #[serde(default)]
    pub buttons: Vec<ApplianceButton>,

    #[serde(default)]
    pub state: TvState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightButtonState {
    #[serde(default)]
    pub power: String,

    #[serde(default)]
    pub last_button: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightFacet {
    #[serde(default)]
    pub buttons: Vec<ApplianceButton>,

    #[serde(default)]
    pub state: LightButtonState,
}

/// One ECHONET Lite property reported by a smart meter.
#[derive(Debug, Clone, Deserialize)]
pub struct EchonetProperty {
    pub name: String,
    pub epc: u8,
    pub val: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartMeter {
    #[serde(default)]
    pub echonetlite_properties: Vec<EchonetProperty>,
}

/// A stored IR signal.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signal {
    pub id: String,
    pub name: String,

    /// Icon tag chosen in the vendor app (`ico_on`, `ico_io`, ...).
    #[serde(default)]
    pub image: String,
}

/// A controllable appliance, as returned by `GET /appliances`.
#[derive(Debug, Clone, Deserialize)]
pub struct Appliance {
    pub id: String,
    pub nickname: String,

    #[serde(rename = "type")]
    pub kind: ApplianceKind,

    /// The hub this appliance is controlled through.
    pub device: ApplianceDeviceRef,

    #[serde(default)]
    pub model: Option<ApplianceModel>,

    #[serde(default)]
    pub aircon: Option<Aircon>,

    #[serde(default)]
    pub settings: Option<AirconSettings>,

    #[serde(default)]
    pub tv: Option<TvFacet>,

    #[serde(default)]
    pub light: Option<LightFacet>,

    #[serde(default)]
    pub smart_meter: Option<SmartMeter>,

    #[serde(default)]
    pub signals: Vec<Signal>,
}

impl Appliance {
    /// Timestamp of the smart-meter facet's leading ECHONET property.
    pub fn smart_meter_updated_at(&self) -> Option<DateTime<Utc>> {
        self.smart_meter
            .as_ref()?
            .echonetlite_properties
            .first()
            .map(|p| p.updated_at)
    }

    /// Look up an ECHONET property by its code.
    pub fn echonet_property(&self, epc: u8) -> Option<&EchonetProperty> {
        self.smart_meter
            .as_ref()?
            .echonetlite_properties
            .iter()
            .find(|p| p.epc == epc)
    }
}

impl Record for Appliance {
    fn id(&self) -> &str {
        &self.id
    }
}

/// The account behind the access token, from `GET /users/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub nickname: String,
}
