//! Assigned GATT numbers used by the workflow and UUID parsing.
//!
//! Accepts the same spellings a Web Bluetooth page would pass: full UUIDs,
//! 16/32-bit hex shorthand (optionally `0x` prefixed) and the assigned-number
//! names such as `battery_service`.

use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

use crate::Result;

pub const BATTERY_SERVICE: Uuid = uuid_from_u16(0x180F);
pub const BATTERY_LEVEL: Uuid = uuid_from_u16(0x2A19);
pub const DEVICE_INFORMATION: Uuid = uuid_from_u16(0x180A);
pub const MODEL_NUMBER_STRING: Uuid = uuid_from_u16(0x2A24);
pub const MANUFACTURER_NAME_STRING: Uuid = uuid_from_u16(0x2A29);

/// Manufacturer data company identifier reserved for testing.
pub const TEST_COMPANY_ID: u16 = 0xFFFF;

const ASSIGNED_NAMES: &[(&str, u16)] = &[
  ("generic_access", 0x1800),
  ("generic_attribute", 0x1801),
  ("device_information", 0x180A),
  ("heart_rate", 0x180D),
  ("battery_service", 0x180F),
  ("device_name", 0x2A00),
  ("battery_level", 0x2A19),
  ("system_id", 0x2A23),
  ("model_number_string", 0x2A24),
  ("serial_number_string", 0x2A25),
  ("firmware_revision_string", 0x2A26),
  ("hardware_revision_string", 0x2A27),
  ("software_revision_string", 0x2A28),
  ("manufacturer_name_string", 0x2A29),
];

pub fn parse_uuid(input: &str) -> Result<Uuid> {
  let trimmed = input.trim();
  if let Some((_, short)) = ASSIGNED_NAMES
    .iter()
    .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
  {
    return Ok(uuid_from_u16(*short));
  }
  let trimmed = trimmed.trim_start_matches("0x");
  let normalized = match trimmed.len() {
    4 => format!("0000{trimmed}-0000-1000-8000-00805f9b34fb"),
    8 => format!("{trimmed}-0000-1000-8000-00805f9b34fb"),
    _ => trimmed.to_string(),
  };
  Ok(Uuid::parse_str(&normalized)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_assigned_names() {
    assert_eq!(parse_uuid("battery_service").unwrap(), BATTERY_SERVICE);
    assert_eq!(parse_uuid("Battery_Level").unwrap(), BATTERY_LEVEL);
    assert_eq!(parse_uuid("device_information").unwrap(), DEVICE_INFORMATION);
  }

  #[test]
  fn parses_short_forms() {
    assert_eq!(parse_uuid("180f").unwrap(), BATTERY_SERVICE);
    assert_eq!(parse_uuid("0x2A24").unwrap(), MODEL_NUMBER_STRING);
    assert_eq!(parse_uuid("0000180a").unwrap(), DEVICE_INFORMATION);
    assert_eq!(
      parse_uuid("0000180f-0000-1000-8000-00805f9b34fb").unwrap(),
      BATTERY_SERVICE
    );
  }

  #[test]
  fn rejects_garbage() {
    assert!(parse_uuid("not_a_service").is_err());
  }
}
