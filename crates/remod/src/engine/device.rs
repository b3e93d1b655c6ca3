/// A device registry entry.
///
/// A device represents a physical or logical unit that one or more entities
/// belong to: a sensor hub, or an appliance controlled through one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,

    /// Network MAC address, when the device reports one.
    pub mac_address: Option<String>,

    /// Id of the device this one is reached through (e.g. an appliance
    /// behind an IR hub).
    pub via_device: Option<String>,
}

impl Device {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            manufacturer: None,
            model: None,
            sw_version: None,
            mac_address: None,
            via_device: None,
        }
    }
}
