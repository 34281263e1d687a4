//! Service and characteristic identifiers.
//!
//! The UI addresses GATT attributes either by name (`"battery_service"`, a
//! full UUID string) or by a numeric code written with a `0x` prefix
//! (`"0x180F"`). This module normalizes both forms and resolves them to the
//! 128-bit UUIDs btleplug works with.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Low 96 bits of the Bluetooth Base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// GATT service names from the Bluetooth assigned numbers.
const SERVICE_NAMES: &[(&str, u16)] = &[
    ("generic_access", 0x1800),
    ("generic_attribute", 0x1801),
    ("immediate_alert", 0x1802),
    ("link_loss", 0x1803),
    ("tx_power", 0x1804),
    ("current_time", 0x1805),
    ("reference_time_update", 0x1806),
    ("next_dst_change", 0x1807),
    ("glucose", 0x1808),
    ("health_thermometer", 0x1809),
    ("device_information", 0x180a),
    ("heart_rate", 0x180d),
    ("phone_alert_status", 0x180e),
    ("battery_service", 0x180f),
    ("blood_pressure", 0x1810),
    ("alert_notification", 0x1811),
    ("human_interface_device", 0x1812),
    ("scan_parameters", 0x1813),
    ("running_speed_and_cadence", 0x1814),
    ("automation_io", 0x1815),
    ("cycling_speed_and_cadence", 0x1816),
    ("cycling_power", 0x1818),
    ("location_and_navigation", 0x1819),
    ("environmental_sensing", 0x181a),
    ("body_composition", 0x181b),
    ("user_data", 0x181c),
    ("weight_scale", 0x181d),
    ("bond_management", 0x181e),
    ("continuous_glucose_monitoring", 0x181f),
    ("internet_protocol_support", 0x1820),
    ("indoor_positioning", 0x1821),
    ("pulse_oximeter", 0x1822),
    ("http_proxy", 0x1823),
    ("transport_discovery", 0x1824),
    ("object_transfer", 0x1825),
    ("fitness_machine", 0x1826),
];

/// GATT characteristic names from the Bluetooth assigned numbers.
const CHARACTERISTIC_NAMES: &[(&str, u16)] = &[
    ("gap.device_name", 0x2a00),
    ("gap.appearance", 0x2a01),
    ("gap.peripheral_privacy_flag", 0x2a02),
    ("gap.reconnection_address", 0x2a03),
    ("gap.peripheral_preferred_connection_parameters", 0x2a04),
    ("gatt.service_changed", 0x2a05),
    ("alert_level", 0x2a06),
    ("tx_power_level", 0x2a07),
    ("date_time", 0x2a08),
    ("day_of_week", 0x2a09),
    ("day_date_time", 0x2a0a),
    ("exact_time_256", 0x2a0c),
    ("dst_offset", 0x2a0d),
    ("time_zone", 0x2a0e),
    ("local_time_information", 0x2a0f),
    ("time_with_dst", 0x2a11),
    ("time_accuracy", 0x2a12),
    ("time_source", 0x2a13),
    ("reference_time_information", 0x2a14),
    ("time_update_control_point", 0x2a16),
    ("time_update_state", 0x2a17),
    ("glucose_measurement", 0x2a18),
    ("battery_level", 0x2a19),
    ("temperature_measurement", 0x2a1c),
    ("temperature_type", 0x2a1d),
    ("intermediate_temperature", 0x2a1e),
    ("measurement_interval", 0x2a21),
    ("boot_keyboard_input_report", 0x2a22),
    ("system_id", 0x2a23),
    ("model_number_string", 0x2a24),
    ("serial_number_string", 0x2a25),
    ("firmware_revision_string", 0x2a26),
    ("hardware_revision_string", 0x2a27),
    ("software_revision_string", 0x2a28),
    ("manufacturer_name_string", 0x2a29),
    ("current_time", 0x2a2b),
    ("scan_refresh", 0x2a31),
    ("boot_keyboard_output_report", 0x2a32),
    ("boot_mouse_input_report", 0x2a33),
    ("glucose_measurement_context", 0x2a34),
    ("blood_pressure_measurement", 0x2a35),
    ("intermediate_cuff_pressure", 0x2a36),
    ("heart_rate_measurement", 0x2a37),
    ("body_sensor_location", 0x2a38),
    ("heart_rate_control_point", 0x2a39),
    ("alert_status", 0x2a3f),
    ("ringer_control_point", 0x2a40),
    ("ringer_setting", 0x2a41),
    ("alert_category_id_bit_mask", 0x2a42),
    ("alert_category_id", 0x2a43),
    ("alert_notification_control_point", 0x2a44),
    ("unread_alert_status", 0x2a45),
    ("new_alert", 0x2a46),
    ("supported_new_alert_category", 0x2a47),
    ("supported_unread_alert_category", 0x2a48),
    ("blood_pressure_feature", 0x2a49),
    ("hid_information", 0x2a4a),
    ("report_map", 0x2a4b),
    ("hid_control_point", 0x2a4c),
    ("report", 0x2a4d),
    ("protocol_mode", 0x2a4e),
    ("scan_interval_window", 0x2a4f),
    ("pnp_id", 0x2a50),
    ("glucose_feature", 0x2a51),
    ("record_access_control_point", 0x2a52),
    ("rsc_measurement", 0x2a53),
    ("rsc_feature", 0x2a54),
    ("sc_control_point", 0x2a55),
    ("csc_measurement", 0x2a5b),
    ("csc_feature", 0x2a5c),
    ("sensor_location", 0x2a5d),
    ("cycling_power_measurement", 0x2a63),
    ("cycling_power_vector", 0x2a64),
    ("cycling_power_feature", 0x2a65),
    ("cycling_power_control_point", 0x2a66),
    ("pressure", 0x2a6d),
    ("temperature", 0x2a6e),
    ("humidity", 0x2a6f),
    ("body_composition_feature", 0x2a9b),
    ("body_composition_measurement", 0x2a9c),
    ("weight_measurement", 0x2a9d),
    ("weight_scale_feature", 0x2a9e),
    ("fitness_machine_control_point", 0x2ad9),
];

/// A normalized service or characteristic identifier.
///
/// Names cover the commonly used GATT assigned numbers. Attributes outside
/// the tables, including vendor UUIDs, resolve from their UUID string or a
/// `0x` code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// A name or UUID string, passed through unchanged.
    Name(String),
    /// A numeric code parsed from a `0x`-prefixed string.
    Code(u32),
}

impl Identifier {
    /// Normalize an identifier string.
    ///
    /// Strings whose lowercase form starts with `0x` become [`Identifier::Code`]
    /// holding the value of the hex digits that follow. Parsing stops at the
    /// first non-hex character, so `"0x18zz"` is `0x18`. Everything else is
    /// returned unchanged as [`Identifier::Name`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] when the prefix is followed by no
    /// hex digit or the value does not fit in 32 bits.
    ///
    /// # Example
    ///
    /// ```
    /// use gatt_port_relay::Identifier;
    ///
    /// assert_eq!(Identifier::parse("0x180A").unwrap(), Identifier::Code(6154));
    /// assert_eq!(
    ///     Identifier::parse("battery_service").unwrap(),
    ///     Identifier::Name("battery_service".to_string())
    /// );
    /// ```
    pub fn parse(identifier: &str) -> Result<Self> {
        let Some(digits) = strip_hex_prefix(identifier) else {
            return Ok(Self::Name(identifier.to_string()));
        };

        let end = digits
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(digits.len());

        u32::from_str_radix(&digits[..end], 16)
            .map(Self::Code)
            .map_err(|_| Error::InvalidIdentifier {
                identifier: identifier.to_string(),
            })
    }

    /// Resolve this identifier as a GATT service.
    pub fn service_uuid(&self) -> Result<Uuid> {
        self.resolve(SERVICE_NAMES)
    }

    /// Resolve this identifier as a GATT characteristic.
    pub fn characteristic_uuid(&self) -> Result<Uuid> {
        self.resolve(CHARACTERISTIC_NAMES)
    }

    fn resolve(&self, names: &[(&str, u16)]) -> Result<Uuid> {
        match self {
            Self::Code(code) => Ok(uuid_from_code(*code)),
            Self::Name(name) => {
                if let Ok(uuid) = Uuid::parse_str(name) {
                    return Ok(uuid);
                }
                names
                    .iter()
                    .find(|(known, _)| *known == name)
                    .map(|(_, code)| uuid_from_code(u32::from(*code)))
                    .ok_or_else(|| Error::UnknownIdentifier {
                        identifier: name.clone(),
                    })
            }
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Code(code) => write!(f, "{:#06x}", code),
        }
    }
}

/// Normalize an optional identifier; `None` stays `None`.
pub fn normalize(identifier: Option<&str>) -> Result<Option<Identifier>> {
    identifier.map(Identifier::parse).transpose()
}

/// Expand a 16- or 32-bit assigned number into a full UUID.
pub fn uuid_from_code(code: u32) -> Uuid {
    Uuid::from_u128((u128::from(code) << 96) | BLUETOOTH_BASE_UUID)
}

fn strip_hex_prefix(identifier: &str) -> Option<&str> {
    let prefix = identifier.get(..2)?;
    if prefix.eq_ignore_ascii_case("0x") {
        identifier.get(2..)
    } else {
        None
    }
}
