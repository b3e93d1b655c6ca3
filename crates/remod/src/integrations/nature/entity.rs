use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::mpsc;

use super::client::ApiError;
use super::client::NatureClient;
use super::models::Appliance;
use super::models::Device;
use super::rate_limit::RateLimit;
use crate::engine::Entity;

/// Outcome of one poll cycle, handed to each entity.
pub struct PollUpdate<'a, T> {
    /// Whether the poll attempt succeeded.
    pub success: bool,

    /// Whether the API quota was exhausted at poll time.
    pub quota_exhausted: bool,

    /// Records from the latest successful poll, keyed by id.
    pub records: &'a HashMap<String, T>,
}

/// What an entity should do with a poll outcome for its backing record.
pub enum Resolution<'a, T> {
    /// Poll failed while the quota was exhausted. Keep everything as-is;
    /// the data is stale but no verdict on the record can be drawn.
    Unchanged,

    /// The record is gone or the poll failed; mark unavailable.
    Unavailable,

    /// Fresh record; re-derive state from it.
    Available(&'a T),
}

impl<'a, T> PollUpdate<'a, T> {
    /// Resolve the poll outcome for the record with the given id.
    pub fn resolve(&self, id: &str) -> Resolution<'a, T> {
        if !self.success && self.quota_exhausted {
            return Resolution::Unchanged;
        }
        match self.records.get(id) {
            Some(record) if self.success => Resolution::Available(record),
            _ => Resolution::Unavailable,
        }
    }
}

/// Fired by a debounce timer once pending settings should be flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceFire {
    pub entity_id: String,

    /// Matches the generation recorded when the timer was armed; stale
    /// fires are dropped.
    pub generation: u64,
}

/// Everything an entity needs to execute a command.
pub struct CommandContext {
    pub client: Arc<NatureClient>,
    pub debounce_tx: mpsc::UnboundedSender<DebounceFire>,
}

/// An entity backed by the vendor API.
///
/// The `on_*` hooks return whether the entity's visible state changed, so
/// the dispatcher only publishes snapshots that actually moved.
#[async_trait]
pub trait NatureEntity: Entity + Send + Sync {
    /// Registry id of the hub this entity hangs off, if any.
    fn device_id(&self) -> Option<&str> {
        None
    }

    fn on_devices(&mut self, _update: &PollUpdate<'_, Device>, _now: DateTime<Utc>) -> bool {
        false
    }

    fn on_appliances(&mut self, _update: &PollUpdate<'_, Appliance>, _now: DateTime<Utc>) -> bool {
        false
    }

    fn on_rate_limit(&mut self, _limit: Option<RateLimit>) -> bool {
        false
    }

    /// Execute a command addressed to this entity.
    async fn handle_command(
        &mut self,
        _ctx: &CommandContext,
        _command: crate::engine::EntityCommand,
    ) -> Result<bool, ApiError> {
        Ok(false)
    }

    /// Flush work armed by an earlier command once its debounce expires.
    async fn handle_debounce(
        &mut self,
        _ctx: &CommandContext,
        _generation: u64,
    ) -> Result<bool, ApiError> {
        Ok(false)
    }
}

/// Format a reading for state JSON, dropping the decimal point when the
/// value is integral ("25" rather than "25.0").
pub fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_unchanged_when_quota_blocked_the_poll() {
        let records: HashMap<String, u32> = HashMap::new();
        let update = PollUpdate {
            success: false,
            quota_exhausted: true,
            records: &records,
        };
        assert!(matches!(update.resolve("x"), Resolution::Unchanged));
    }

    #[test]
    fn resolve_marks_missing_records_unavailable() {
        let mut records = HashMap::new();
        records.insert("a".to_string(), 1u32);
        let update = PollUpdate {
            success: true,
            quota_exhausted: false,
            records: &records,
        };
        assert!(matches!(update.resolve("b"), Resolution::Unavailable));
        assert!(matches!(update.resolve("a"), Resolution::Available(&1)));
    }

    #[test]
    fn resolve_marks_failed_polls_unavailable_when_quota_remains() {
        let mut records = HashMap::new();
        records.insert("a".to_string(), 1u32);
        let update = PollUpdate {
            success: false,
            quota_exhausted: false,
            records: &records,
        };
        assert!(matches!(update.resolve("a"), Resolution::Unavailable));
    }

    #[test]
    fn integral_values_format_without_fraction() {
        assert_eq!(format_decimal(25.0), "25");
        assert_eq!(format_decimal(25.5), "25.5");
        assert_eq!(format_decimal(-3.0), "-3");
    }
}
