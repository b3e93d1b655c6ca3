//! Type-safe message system between the engine and its integrations.
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: events from integrations to the engine
//! - `ToIntegrationMessage`: commands from the engine to integrations

use std::time::Duration;

use super::device::Device;
use super::state::HvacMode;
use super::state::Platform;

/// Everything the engine needs to register a newly discovered entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub platform: Platform,
    pub name: String,

    /// Registry id of the device this entity belongs to, if any.
    pub device_id: Option<String>,
}

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        descriptor: EntityDescriptor,
        integration_name: String,
    },

    /// An entity's availability or state changed
    EntityUpdated {
        entity_id: String,
        available: bool,
        state: serde_json::Value,
    },

    /// A device was discovered (or re-reported with fresh details)
    DeviceDiscovered { device: Device },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone)]
pub enum ToIntegrationMessage {
    Command {
        entity_id: String,
        command: EntityCommand,
    },
}

/// A user-initiated command addressed to one entity.
///
/// Which variants an entity accepts depends on its platform; integrations
/// log and drop commands their entities cannot handle.
#[derive(Debug, Clone)]
pub enum EntityCommand {
    SetTemperature { temperature: f64 },
    SetHvacMode { mode: HvacMode },
    SetFanMode { mode: String },
    SetSwingMode { mode: String },

    /// Turn on, optionally selecting a named activity (lights).
    TurnOn { activity: Option<String> },
    TurnOff,

    /// Send stored remote commands (signal ids or button names) in order,
    /// repeating the whole sequence with a delay between repeats.
    SendCommands {
        commands: Vec<String>,
        delay: Duration,
        repeats: u32,
    },

    /// Delete a stored remote signal.
    DeleteCommand { command: String },

    SelectSource { source: String },
    MediaPlay,
    MediaPause,
    MediaStop,
    MediaNextTrack,
    MediaPreviousTrack,
    VolumeUp,
    VolumeDown,
    MuteVolume { mute: bool },

    /// Press a stateless button entity.
    Press,

    /// Set a number entity's value.
    SetValue { value: f64 },
}
