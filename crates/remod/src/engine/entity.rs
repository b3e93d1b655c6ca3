use super::state::Platform;

/// Base trait that all entities must implement.
///
/// Entities live inside their integration; the engine only ever sees the
/// serialized snapshots they produce here.
pub trait Entity: Send {
    /// Stable identifier, unique across the whole engine.
    fn entity_id(&self) -> &str;

    /// The platform this entity belongs to (climate, sensor, ...).
    fn platform(&self) -> Platform;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Whether the entity currently has live backing data.
    fn available(&self) -> bool;

    /// Serialize current state to JSON for engine storage.
    fn state_json(&self) -> serde_json::Value;
}
