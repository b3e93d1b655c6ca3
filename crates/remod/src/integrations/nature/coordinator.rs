//! Polling coordination for the two list resources.
//!
//! Wakeups are floored to whole seconds so the poll cadence stays constant,
//! and the appliance poller aligns itself to the smart meter's own update
//! rhythm when one is present.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Timelike;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::warn;

use super::client::ApiError;
use super::client::NatureClient;
use super::models::Appliance;
use super::models::Device;
use super::models::Record;

/// A list resource the integration polls on an interval.
pub trait PolledResource {
    type Record: DeserializeOwned + Record + Clone + Send;

    const PATH: &'static str;

    /// Resource-specific hint for when the next poll should land, if the
    /// data suggests one.
    fn next_update(
        _records: &HashMap<String, Self::Record>,
        _now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        None
    }
}

pub struct Devices;

impl PolledResource for Devices {
    type Record = Device;

    const PATH: &'static str = "devices";
}

pub struct Appliances;

impl PolledResource for Appliances {
    type Record = Appliance;

    const PATH: &'static str = "appliances";

    fn next_update(
        records: &HashMap<String, Self::Record>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        smart_meter_next_update(records.values(), now)
    }
}

/// Align the next appliance poll to the smart meter's reporting rhythm.
///
/// Meters report roughly once a minute; polling 62 seconds after the last
/// report usually catches a fresh value. If that moment has already passed,
/// two staggered retries (5 then 10 seconds later) cover reporting jitter
/// before giving up and returning the stale target as-is.
pub fn smart_meter_next_update<'a, I>(appliances: I, now: DateTime<Utc>) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = &'a Appliance>,
{
    let newest = appliances
        .into_iter()
        .filter_map(|a| a.smart_meter_updated_at())
        .max()?;

    let target = newest + TimeDelta::seconds(62);
    let retry = target + TimeDelta::seconds(5);
    if target < now && retry >= now {
        return Some(retry);
    }
    let retry = target + TimeDelta::seconds(10);
    if target < now && retry >= now {
        return Some(retry);
    }
    Some(target)
}

/// Pick the next wakeup instant given the poll interval and an optional
/// resource hint. `now` is floored to the second so consecutive polls keep
/// a steady cadence.
pub fn next_wakeup(
    now: DateTime<Utc>,
    interval: TimeDelta,
    hint: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let floored = now.with_nanosecond(0).unwrap_or(now);
    match hint {
        Some(hint) if floored <= hint => hint,
        Some(hint) => {
            // Stale hint. Keep its phase but advance whole intervals until
            // the wakeup lands in the future.
            let mut time = hint;
            while time < now {
                time += interval;
            }
            time
        }
        None => floored + interval,
    }
}

/// Polls one list resource, remembers the outcome, and answers "when next".
pub struct Coordinator<R: PolledResource> {
    client: Arc<NatureClient>,
    interval: TimeDelta,

    /// Records from the last successful poll, keyed by id.
    pub data: HashMap<String, R::Record>,

    /// Whether the most recent poll attempt succeeded.
    pub last_update_success: bool,

    next_hint: Option<DateTime<Utc>>,
    retry_at: Option<DateTime<Utc>>,

    _resource: PhantomData<R>,
}

impl<R: PolledResource> Coordinator<R> {
    pub fn new(client: Arc<NatureClient>, interval: TimeDelta) -> Self {
        Self {
            client,
            interval,
            data: HashMap::new(),
            last_update_success: false,
            next_hint: None,
            retry_at: None,
            _resource: PhantomData,
        }
    }

    /// Poll the resource once.
    ///
    /// Authentication failures propagate; anything else is recorded as a
    /// failed update and retried on the normal schedule (or at the quota
    /// reset when the API throttles us).
    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        match self.client.get_records::<R::Record>(R::PATH).await {
            Ok(records) => {
                debug!(resource = R::PATH, count = records.len(), "poll succeeded");
                self.data = records;
                self.last_update_success = true;
                self.retry_at = None;
                self.next_hint = R::next_update(&self.data, Utc::now());
            }
            Err(ApiError::AuthenticationFailed) => {
                return Err(ApiError::AuthenticationFailed);
            }
            Err(ApiError::QuotaExhausted { reset }) => {
                warn!(resource = R::PATH, %reset, "poll throttled, backing off");
                self.last_update_success = false;
                self.retry_at = Some(reset + TimeDelta::seconds(1));
            }
            Err(e) => {
                warn!(resource = R::PATH, error = %e, "poll failed");
                self.last_update_success = false;
                // A stale quota deadline would put the next wakeup in the
                // past; fall back to the normal schedule instead.
                self.retry_at = None;
            }
        }
        Ok(())
    }

    /// When the next poll should run.
    pub fn next_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(retry) = self.retry_at {
            return retry.max(now);
        }
        next_wakeup(now, self.interval, self.next_hint)
    }
}
