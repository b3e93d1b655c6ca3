use std::collections::HashMap;
use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::NatureConfig;
use super::binary_sensor::MotionSensor;
use super::button::SignalButton;
use super::client::ApiError;
use super::client::NatureClient;
use super::client::ReqwestTransport;
use super::climate::AirconEntity;
use super::coordinator::Appliances;
use super::coordinator::Coordinator;
use super::coordinator::Devices;
use super::entity::CommandContext;
use super::entity::DebounceFire;
use super::entity::NatureEntity;
use super::entity::PollUpdate;
use super::media_player::TvEntity;
use super::models::Appliance;
use super::models::ApplianceKind;
use super::number::OffsetEntity;
use super::number::OffsetKind;
use super::remote::RemoteEntity;
use super::remote::RemoteKind;
use super::sensor::EPC_ENERGY_NORMAL;
use super::sensor::EPC_ENERGY_REVERSE;
use super::sensor::MeterKind;
use super::sensor::RateLimitSensor;
use super::sensor::RemoReading;
use super::sensor::RemoSensor;
use super::sensor::SmartMeterSensor;
use crate::engine::Device;
use crate::engine::Entity;
use crate::engine::EntityCommand;
use crate::engine::EntityDescriptor;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

pub const INTEGRATION_NAME: &str = "nature_remo";

fn boxed(e: impl Error + Send + 'static) -> Box<dyn Error + Send> {
    Box::new(e)
}

/// Nature Remo integration for remod
///
/// Bridges the vendor's cloud API into the engine: polls hubs and
/// appliances, translates them into entities, and executes commands.
pub struct NatureIntegration {
    config: NatureConfig,
    command_tx: Option<mpsc::UnboundedSender<(String, EntityCommand)>>,
    dispatcher_task: Option<JoinHandle<()>>,
}

impl NatureIntegration {
    pub fn new(config: &NatureConfig) -> Self {
        Self {
            config: config.clone(),
            command_tx: None,
            dispatcher_task: None,
        }
    }
}

#[async_trait]
impl Integration for NatureIntegration {
    fn name(&self) -> &str {
        INTEGRATION_NAME
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        let client = Arc::new(NatureClient::new(
            Arc::new(ReqwestTransport::new()),
            self.config.base_url.clone(),
            self.config.access_token.clone(),
        ));

        // Validate the token before anything else; a bad token should fail
        // setup rather than surface as endless poll errors.
        let user = client.get_user().await.map_err(boxed)?;
        info!(user = %user.nickname, "authenticated");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.command_tx = Some(command_tx);

        let interval = TimeDelta::seconds(self.config.poll_interval_secs as i64);
        let dispatcher = Dispatcher::new(client, interval, tx, command_rx);
        self.dispatcher_task = Some(tokio::spawn(dispatcher.run()));

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        let ToIntegrationMessage::Command { entity_id, command } = msg;
        let Some(tx) = &self.command_tx else {
            warn!("command before setup: {}", entity_id);
            return Ok(());
        };
        tx.send((entity_id, command)).map_err(boxed)
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        if let Some(task) = self.dispatcher_task.take() {
            task.abort();
        }
        Ok(())
    }
}

/// Single-task event loop owning all entities.
///
/// Everything (polls, commands, debounce fires) funnels through one
/// `select!`, so entity state needs no locking.
struct Dispatcher {
    client: Arc<NatureClient>,
    devices: Coordinator<Devices>,
    appliances: Coordinator<Appliances>,
    entities: HashMap<String, Box<dyn NatureEntity>>,

    /// Device registry entries already reported to the engine.
    registered_devices: HashSet<String>,

    to_engine: FromIntegrationSender,
    command_rx: mpsc::UnboundedReceiver<(String, EntityCommand)>,
    debounce_rx: mpsc::UnboundedReceiver<DebounceFire>,
    ctx: CommandContext,
}

impl Dispatcher {
    fn new(
        client: Arc<NatureClient>,
        interval: TimeDelta,
        to_engine: FromIntegrationSender,
        command_rx: mpsc::UnboundedReceiver<(String, EntityCommand)>,
    ) -> Self {
        let (debounce_tx, debounce_rx) = mpsc::unbounded_channel();
        Self {
            devices: Coordinator::new(client.clone(), interval),
            appliances: Coordinator::new(client.clone(), interval),
            entities: HashMap::new(),
            registered_devices: HashSet::new(),
            to_engine,
            command_rx,
            debounce_rx,
            ctx: CommandContext {
                client: client.clone(),
                debounce_tx,
            },
            client,
        }
    }

    async fn run(mut self) {
        if let Err(e) = self.run_inner().await {
            error!(error = %e, "integration stopped");
        }
    }

    async fn run_inner(&mut self) -> Result<(), ApiError> {
        self.register(Box::new(RateLimitSensor::new())).await;
        self.poll_devices().await?;
        self.poll_appliances().await?;

        loop {
            let now = Utc::now();
            let next_devices = self.devices.next_deadline(now);
            let next_appliances = self.appliances.next_deadline(now);
            debug!(%next_devices, %next_appliances, "sleeping until next poll");

            tokio::select! {
                _ = sleep_until_utc(next_devices) => {
                    self.poll_devices().await?;
                }
                _ = sleep_until_utc(next_appliances) => {
                    self.poll_appliances().await?;
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some((entity_id, command)) => {
                        self.handle_command(entity_id, command).await?;
                    }
                    None => break,
                },
                Some(fire) = self.debounce_rx.recv() => {
                    self.handle_debounce(fire).await?;
                }
            }
        }

        info!("command channel closed, stopping");
        Ok(())
    }

    /// Register an entity: remember it, tell the engine, publish its
    /// initial state.
    async fn register(&mut self, entity: Box<dyn NatureEntity>) {
        let descriptor = EntityDescriptor {
            entity_id: entity.entity_id().to_string(),
            platform: entity.platform(),
            name: entity.name().to_string(),
            device_id: entity.device_id().map(|d| d.to_string()),
        };
        info!(entity_id = %descriptor.entity_id, "discovered entity");

        let initial = FromIntegrationMessage::EntityUpdated {
            entity_id: descriptor.entity_id.clone(),
            available: entity.available(),
            state: entity.state_json(),
        };
        let discovered = FromIntegrationMessage::EntityDiscovered {
            descriptor,
            integration_name: INTEGRATION_NAME.to_string(),
        };

        self.entities.insert(entity.entity_id().to_string(), entity);
        let _ = self.to_engine.send(discovered).await;
        let _ = self.to_engine.send(initial).await;
    }

    async fn publish(
        to_engine: &FromIntegrationSender,
        entity: &dyn NatureEntity,
    ) {
        let _ = to_engine
            .send(FromIntegrationMessage::EntityUpdated {
                entity_id: entity.entity_id().to_string(),
                available: entity.available(),
                state: entity.state_json(),
            })
            .await;
    }

    async fn poll_devices(&mut self) -> Result<(), ApiError> {
        self.devices.refresh().await?;
        self.discover_from_devices().await;

        let now = Utc::now();
        let limit = self.client.rate_limit().snapshot();
        let update = PollUpdate {
            success: self.devices.last_update_success,
            quota_exhausted: self.client.rate_limit().is_exhausted(now),
            records: &self.devices.data,
        };
        for entity in self.entities.values_mut() {
            let changed = entity.on_devices(&update, now) | entity.on_rate_limit(limit);
            if changed {
                Self::publish(&self.to_engine, entity.as_ref()).await;
            }
        }
        Ok(())
    }

    async fn poll_appliances(&mut self) -> Result<(), ApiError> {
        self.appliances.refresh().await?;
        self.discover_from_appliances().await;

        let now = Utc::now();
        let limit = self.client.rate_limit().snapshot();
        let update = PollUpdate {
            success: self.appliances.last_update_success,
            quota_exhausted: self.client.rate_limit().is_exhausted(now),
            records: &self.appliances.data,
        };
        for entity in self.entities.values_mut() {
            let changed = entity.on_appliances(&update, now) | entity.on_rate_limit(limit);
            if changed {
                Self::publish(&self.to_engine, entity.as_ref()).await;
            }
        }
        Ok(())
    }

    async fn discover_from_devices(&mut self) {
        let mut new_devices: Vec<Device> = Vec::new();
        let mut new_entities: Vec<Box<dyn NatureEntity>> = Vec::new();

        for device in self.devices.data.values() {
            if self.registered_devices.insert(device.id.clone()) {
                let mut entry = Device::new(device.id.clone(), device.name.clone());
                entry.manufacturer = Some("Nature".to_string());
                entry.model = Some(device.model_name().to_string());
                entry.sw_version = Some(device.firmware_version.clone());
                entry.mac_address = Some(device.mac_address.clone());
                new_devices.push(entry);
            }

            for reading in [
                RemoReading::Temperature,
                RemoReading::Humidity,
                RemoReading::Illuminance,
            ] {
                if device.newest_events.contains_key(reading.event_key()) {
                    let candidate = RemoSensor::new(device, reading);
                    if !self.entities.contains_key(candidate.entity_id()) {
                        new_entities.push(Box::new(candidate));
                    }
                }
            }

            if device.newest_events.contains_key(MotionSensor::EVENT_KEY) {
                let candidate = MotionSensor::new(device);
                if !self.entities.contains_key(candidate.entity_id()) {
                    new_entities.push(Box::new(candidate));
                }
            }

            if device.temperature_offset.is_some() {
                let candidate = OffsetEntity::new(device, OffsetKind::Temperature);
                if !self.entities.contains_key(candidate.entity_id()) {
                    new_entities.push(Box::new(candidate));
                }
            }
            if device.humidity_offset.is_some() {
                let candidate = OffsetEntity::new(device, OffsetKind::Humidity);
                if !self.entities.contains_key(candidate.entity_id()) {
                    new_entities.push(Box::new(candidate));
                }
            }
        }

        for device in new_devices {
            let _ = self
                .to_engine
                .send(FromIntegrationMessage::DeviceDiscovered { device })
                .await;
        }
        for entity in new_entities {
            self.register(entity).await;
        }
    }

    async fn discover_from_appliances(&mut self) {
        let mut new_devices: Vec<Device> = Vec::new();
        let mut new_entities: Vec<Box<dyn NatureEntity>> = Vec::new();

        for appliance in self.appliances.data.values() {
            if self.registered_devices.insert(appliance.id.clone()) {
                new_devices.push(appliance_registry_entry(appliance));
            }

            let mut candidates: Vec<Box<dyn NatureEntity>> = Vec::new();
            match appliance.kind {
                ApplianceKind::Ac => {
                    candidates.push(Box::new(AirconEntity::new(appliance)));
                }
                ApplianceKind::SmartMeter => {
                    candidates.push(Box::new(SmartMeterSensor::new(appliance, MeterKind::Power)));
                    candidates.push(Box::new(SmartMeterSensor::new(
                        appliance,
                        MeterKind::Energy {
                            epc: EPC_ENERGY_NORMAL,
                        },
                    )));
                    candidates.push(Box::new(SmartMeterSensor::new(
                        appliance,
                        MeterKind::Energy {
                            epc: EPC_ENERGY_REVERSE,
                        },
                    )));
                }
                ApplianceKind::Tv => {
                    candidates.push(Box::new(RemoteEntity::new(appliance, RemoteKind::Tv)));
                    candidates.push(Box::new(TvEntity::new(appliance)));
                }
                ApplianceKind::Light => {
                    candidates.push(Box::new(RemoteEntity::new(appliance, RemoteKind::Light)));
                }
                ApplianceKind::Ir => {
                    candidates.push(Box::new(RemoteEntity::new(appliance, RemoteKind::Ir)));
                }
                ApplianceKind::Other => {}
            }
            for signal in &appliance.signals {
                candidates.push(Box::new(SignalButton::new(signal, &appliance.device.id)));
            }

            for candidate in candidates {
                if !self.entities.contains_key(candidate.entity_id()) {
                    new_entities.push(candidate);
                }
            }
        }

        for device in new_devices {
            let _ = self
                .to_engine
                .send(FromIntegrationMessage::DeviceDiscovered { device })
                .await;
        }
        for entity in new_entities {
            self.register(entity).await;
        }
    }

    async fn handle_command(
        &mut self,
        entity_id: String,
        command: EntityCommand,
    ) -> Result<(), ApiError> {
        {
            let Some(entity) = self.entities.get_mut(&entity_id) else {
                warn!(%entity_id, "command for unknown entity");
                return Ok(());
            };
            match entity.handle_command(&self.ctx, command).await {
                Ok(true) => Self::publish(&self.to_engine, entity.as_ref()).await,
                Ok(false) => {}
                Err(ApiError::AuthenticationFailed) => {
                    return Err(ApiError::AuthenticationFailed);
                }
                Err(e) => warn!(%entity_id, error = %e, "command failed"),
            }
        }
        self.publish_rate_limit().await;
        Ok(())
    }

    async fn handle_debounce(&mut self, fire: DebounceFire) -> Result<(), ApiError> {
        {
            let Some(entity) = self.entities.get_mut(&fire.entity_id) else {
                return Ok(());
            };
            match entity.handle_debounce(&self.ctx, fire.generation).await {
                Ok(true) => Self::publish(&self.to_engine, entity.as_ref()).await,
                Ok(false) => {}
                Err(ApiError::AuthenticationFailed) => {
                    return Err(ApiError::AuthenticationFailed);
                }
                Err(e) => warn!(entity_id = %fire.entity_id, error = %e, "deferred update failed"),
            }
        }
        self.publish_rate_limit().await;
        Ok(())
    }

    /// Commands consume quota too; refresh the diagnostic sensor after any
    /// API call outside the poll cycle.
    async fn publish_rate_limit(&mut self) {
        let limit = self.client.rate_limit().snapshot();
        for entity in self.entities.values_mut() {
            if entity.on_rate_limit(limit) {
                Self::publish(&self.to_engine, entity.as_ref()).await;
            }
        }
    }
}

fn appliance_registry_entry(appliance: &Appliance) -> Device {
    let mut entry = Device::new(appliance.id.clone(), appliance.nickname.clone());
    if let Some(model) = &appliance.model {
        entry.manufacturer = Some(model.manufacturer.clone());
        entry.model = Some(model.name.clone());
    }
    entry.via_device = Some(appliance.device.id.clone());
    entry
}

async fn sleep_until_utc(deadline: DateTime<Utc>) {
    let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    sleep(wait).await;
}
