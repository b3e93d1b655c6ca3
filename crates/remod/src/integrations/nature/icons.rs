//! Icon tags published in entity state, mirroring the icon choices the
//! vendor app offers for stored signals.

/// Map a signal's vendor image tag to an icon identifier.
pub fn signal_icon(image: &str) -> Option<&'static str> {
    let icon = match image {
        "ico_0" => "mdi:numeric-0",
        "ico_1" => "mdi:numeric-1",
        "ico_2" => "mdi:numeric-2",
        "ico_3" => "mdi:numeric-3",
        "ico_4" => "mdi:numeric-4",
        "ico_5" => "mdi:numeric-5",
        "ico_6" => "mdi:numeric-6",
        "ico_7" => "mdi:numeric-7",
        "ico_8" => "mdi:numeric-8",
        "ico_9" => "mdi:numeric-9",
        "ico_10" => "mdi:numeric-10",
        "ico_ac_fan" => "mdi:fan",
        "ico_arrow_bottom" => "mdi:arrow-down-drop-circle",
        "ico_arrow_top" => "mdi:arrow-up-drop-circle",
        "ico_blast" => "mdi:weather-windy",
        "ico_io" => "mdi:power",
        "ico_minus" => "mdi:minus",
        "ico_night_light" => "mdi:weather-night",
        "ico_off" => "mdi:toggle-switch-off-outline",
        "ico_on" => "mdi:toggle-switch",
        "ico_plus" => "mdi:plus",
        _ => return None,
    };
    Some(icon)
}

/// Icon for a hub calibration offset entity.
pub fn offset_icon(offset_key: &str) -> Option<&'static str> {
    match offset_key {
        "humidity_offset" => Some("mdi:water-percent"),
        "temperature_offset" => Some("mdi:thermometer"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_map() {
        assert_eq!(signal_icon("ico_on"), Some("mdi:toggle-switch"));
        assert_eq!(signal_icon("ico_io"), Some("mdi:power"));
        assert_eq!(signal_icon("not_a_tag"), None);
        assert_eq!(offset_icon("temperature_offset"), Some("mdi:thermometer"));
    }
}
