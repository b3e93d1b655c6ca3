//! Motion sensor entity. The API only reports the last motion timestamp,
//! so the sensor is "on" while that timestamp is less than a minute old.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use serde_json::json;

use super::entity::NatureEntity;
use super::entity::PollUpdate;
use super::entity::Resolution;
use super::models::Device;
use crate::engine::Entity;
use crate::engine::Platform;

const MOTION_WINDOW: TimeDelta = TimeDelta::minutes(1);

pub struct MotionSensor {
    entity_id: String,
    device_id: String,
    name: String,
    available: bool,
    is_on: bool,
    last_motion: Option<DateTime<Utc>>,
}

impl MotionSensor {
    /// Key in the hub's `newest_events` map.
    pub const EVENT_KEY: &'static str = "mo";

    pub fn new(device: &Device) -> Self {
        Self {
            entity_id: format!("binary_sensor.{}-{}", device.id, Self::EVENT_KEY),
            device_id: device.id.clone(),
            name: format!("{} motion", device.name),
            available: false,
            is_on: false,
            last_motion: None,
        }
    }
}

impl Entity for MotionSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> Platform {
        Platform::BinarySensor
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
            "device_class": "motion",
            "last_motion": self.last_motion.map(|t| t.to_rfc3339()),
        })
    }
}

#[async_trait]
impl NatureEntity for MotionSensor {
    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn on_devices(&mut self, update: &PollUpdate<'_, Device>, now: DateTime<Utc>) -> bool {
        match update.resolve(&self.device_id) {
            Resolution::Unchanged => false,
            Resolution::Unavailable => {
                let was = self.available;
                self.available = false;
                was
            }
            Resolution::Available(device) => {
                let last_motion = device
                    .newest_events
                    .get(Self::EVENT_KEY)
                    .map(|e| e.created_at);
                let is_on = last_motion.is_some_and(|t| t >= now - MOTION_WINDOW);
                let available = last_motion.is_some();
                let changed = available != self.available
                    || is_on != self.is_on
                    || last_motion != self.last_motion;
                self.available = available;
                self.is_on = is_on;
                self.last_motion = last_motion;
                changed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;

    fn hub_with_motion(created_at: &str) -> Device {
        serde_json::from_str(&format!(
            r#"{{
                "id": "d1",
                "name": "Hall",
                "mac_address": "m",
                "firmware_version": "Remo/1.0",
                "newest_events": {{
                    "mo": {{ "val": 1, "created_at": "{created_at}" }}
                }}
            }}"#
        ))
        .unwrap()
    }

    fn update_for(device: Device) -> HashMap<String, Device> {
        let mut map = HashMap::new();
        map.insert(device.id.clone(), device);
        map
    }

    #[test]
    fn recent_motion_is_on() {
        let mut sensor = MotionSensor::new(&hub_with_motion("2024-01-01T00:00:00Z"));
        let records = update_for(hub_with_motion("2024-01-01T00:00:00Z"));
        let update = PollUpdate {
            success: true,
            quota_exhausted: false,
            records: &records,
        };

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        assert!(sensor.on_devices(&update, now));
        assert!(sensor.available());
        assert_eq!(sensor.state_json()["is_on"], true);
    }

    #[test]
    fn motion_clears_after_a_minute() {
        let mut sensor = MotionSensor::new(&hub_with_motion("2024-01-01T00:00:00Z"));
        let records = update_for(hub_with_motion("2024-01-01T00:00:00Z"));
        let update = PollUpdate {
            success: true,
            quota_exhausted: false,
            records: &records,
        };

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap();
        sensor.on_devices(&update, now);
        assert_eq!(sensor.state_json()["is_on"], false);
    }
}
