use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::EntityCommand;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::EntityState;
use super::state::State;
use crate::engine::IntegrationContext;

/// remod engine
///
/// This structure routes commands to integrations, receives entity and
/// device events back from them, and maintains a view of the world in State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: HashMap::new(),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: Vec::new(),
        }
    }

    /// Register integrations from configuration
    ///
    /// This is a convenience method that checks the config and registers
    /// any enabled integrations.
    pub fn register_integrations_from_config(
        &mut self,
        cfg: &crate::config::Config,
    ) -> anyhow::Result<()> {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }

        Ok(())
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id.
    pub fn send_command(
        &self,
        entity_id: String,
        command: EntityCommand,
    ) -> Result<(), Box<dyn Error + Send>> {
        // Route to the integration that owns this entity
        let map = self
            .entity_integration_map
            .lock()
            .map_err(|e| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::other(e.to_string()))
            })?;

        let integration_name = map
            .get(&entity_id)
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("No integration found for entity: {}", entity_id),
                ))
            })?;

        let tx = self.integration_channels.get(integration_name).ok_or_else(
            || -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Integration channel not found: {}", integration_name),
                ))
            },
        )?;

        tx.send(ToIntegrationMessage::Command { entity_id, command })
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                descriptor,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    descriptor.entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.insert(descriptor.entity_id.clone(), integration_name);
                }

                // The entity starts unavailable; the first EntityUpdated fills it in.
                {
                    let mut state = State::clone(&self.state.load());
                    state.entities.insert(
                        descriptor.entity_id,
                        EntityState {
                            platform: descriptor.platform,
                            name: descriptor.name,
                            available: false,
                            state: serde_json::Value::Null,
                        },
                    );
                    self.state.store(Arc::new(state));
                }
            }
            FromIntegrationMessage::EntityUpdated {
                entity_id,
                available,
                state: entity_state,
            } => {
                debug!(
                    "Entity updated: {} (available={})",
                    entity_id, available
                );

                let mut state = State::clone(&self.state.load());
                match state.entities.get_mut(&entity_id) {
                    Some(entry) => {
                        entry.available = available;
                        entry.state = entity_state;
                        self.state.store(Arc::new(state));
                    }
                    None => {
                        warn!("State update for unknown entity: {}", entity_id);
                    }
                }
            }
            FromIntegrationMessage::DeviceDiscovered { device } => {
                debug!("Device discovered: {} ({})", device.name, device.id);

                let mut state = State::clone(&self.state.load());
                state.devices.insert(device.id.clone(), device);
                self.state.store(Arc::new(state));
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Device;
    use crate::engine::EntityDescriptor;
    use crate::engine::Platform;

    fn discovered(entity_id: &str) -> FromIntegrationMessage {
        FromIntegrationMessage::EntityDiscovered {
            descriptor: EntityDescriptor {
                entity_id: entity_id.to_string(),
                platform: Platform::Sensor,
                name: "Living Room te".to_string(),
                device_id: Some("d1".to_string()),
            },
            integration_name: "nature_remo".to_string(),
        }
    }

    #[test]
    fn discovery_then_update_populates_state() {
        let engine = Engine::new();

        engine.handle_event(discovered("sensor.d1-te"));
        let snapshot = engine.state_snapshot();
        let entry = snapshot.entities.get("sensor.d1-te").unwrap();
        assert!(!entry.available);
        assert!(entry.state.is_null());

        engine.handle_event(FromIntegrationMessage::EntityUpdated {
            entity_id: "sensor.d1-te".to_string(),
            available: true,
            state: serde_json::json!({ "value": 21.5 }),
        });
        let snapshot = engine.state_snapshot();
        let entry = snapshot.entities.get("sensor.d1-te").unwrap();
        assert!(entry.available);
        assert_eq!(entry.state["value"], 21.5);
    }

    #[test]
    fn device_discovery_fills_registry() {
        let engine = Engine::new();

        let mut device = Device::new("d1".to_string(), "Living Room".to_string());
        device.manufacturer = Some("Nature Inc.".to_string());
        engine.handle_event(FromIntegrationMessage::DeviceDiscovered { device });

        let snapshot = engine.state_snapshot();
        assert_eq!(snapshot.devices["d1"].name, "Living Room");
    }

    #[test]
    fn command_for_unknown_entity_is_rejected() {
        let engine = Engine::new();
        let result = engine.send_command(
            "climate.unknown".to_string(),
            EntityCommand::SetTemperature { temperature: 25.0 },
        );
        assert!(result.is_err());
    }
}
