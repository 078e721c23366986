//! Text rendering consumed by the webview log panel.
//!
//! The exact shape of these strings is relied on by existing displays.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::Serialize;

use crate::gatt::TEST_COMPANY_ID;
use crate::models::Advertisement;

/// Two lower-case hex digits per byte, each followed by a single space.
pub fn hex_dump(bytes: &[u8]) -> String {
  let mut out = String::with_capacity(bytes.len() * 3);
  for byte in bytes {
    let _ = write!(out, "{byte:02x} ");
  }
  out
}

/// Display-ready view of an [`Advertisement`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementSummary {
  pub device_id: String,
  pub device_name: String,
  pub rssi: i16,
  pub tx_power: Option<i16>,
  pub services: Vec<String>,
  pub manufacturer_data: BTreeMap<u16, String>,
  pub service_data: BTreeMap<String, String>,
  /// Manufacturer data under the test company id, decoded as UTF-8.
  pub payload_text: Option<String>,
}

impl From<&Advertisement> for AdvertisementSummary {
  fn from(advertisement: &Advertisement) -> Self {
    Self {
      device_id: advertisement.device.id.clone(),
      device_name: advertisement.device.display_name().to_string(),
      rssi: advertisement.rssi,
      tx_power: advertisement.tx_power,
      services: advertisement.services.iter().map(|uuid| uuid.to_string()).collect(),
      manufacturer_data: advertisement
        .manufacturer_data
        .iter()
        .map(|(key, data)| (*key, hex_dump(data)))
        .collect(),
      service_data: advertisement
        .service_data
        .iter()
        .map(|(key, data)| (key.to_string(), hex_dump(data)))
        .collect(),
      payload_text: advertisement
        .manufacturer_data
        .get(&TEST_COMPANY_ID)
        .map(|data| String::from_utf8_lossy(data).into_owned()),
    }
  }
}

impl fmt::Display for AdvertisementSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Device Name: {}", self.device_name)?;
    writeln!(f, "Device ID: {}", self.device_id)?;
    write!(f, "RSSI: {}", self.rssi)?;
    if let Some(tx_power) = self.tx_power {
      write!(f, "\nTX Power: {tx_power}")?;
    }
    if !self.services.is_empty() {
      write!(f, "\nUUIDs: {}", self.services.join(", "))?;
    }
    for (company, hex) in &self.manufacturer_data {
      write!(f, "\nManufacturer Data 0x{company:04X}: {hex}")?;
    }
    for (service, hex) in &self.service_data {
      write!(f, "\nService Data {service}: {hex}")?;
    }
    if let Some(text) = &self.payload_text {
      write!(f, "\nAdvertising Payload: {text}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gatt::BATTERY_SERVICE;
  use crate::models::DeviceInfo;

  #[test]
  fn hex_dump_is_lower_case_padded_with_trailing_space() {
    assert_eq!(hex_dump(&[0x01, 0xAB, 0x00]), "01 ab 00 ");
    assert_eq!(hex_dump(&[]), "");
    assert_eq!(hex_dump(&[0x0f]), "0f ");
  }

  #[test]
  fn summary_renders_every_present_field() {
    let mut advertisement = Advertisement::new(DeviceInfo::new("AA:BB", Some("Sensor")), -61);
    advertisement.tx_power = Some(4);
    advertisement.services.push(BATTERY_SERVICE);
    advertisement.manufacturer_data.insert(0x004C, vec![0x02, 0x15]);
    advertisement.manufacturer_data.insert(TEST_COMPANY_ID, b"hi".to_vec());
    advertisement.service_data.insert(BATTERY_SERVICE, vec![0x64]);

    let summary = AdvertisementSummary::from(&advertisement);
    assert_eq!(summary.payload_text.as_deref(), Some("hi"));
    assert_eq!(
      summary.to_string(),
      "Device Name: Sensor\n\
       Device ID: AA:BB\n\
       RSSI: -61\n\
       TX Power: 4\n\
       UUIDs: 0000180f-0000-1000-8000-00805f9b34fb\n\
       Manufacturer Data 0x004C: 02 15 \n\
       Manufacturer Data 0xFFFF: 68 69 \n\
       Service Data 0000180f-0000-1000-8000-00805f9b34fb: 64 \n\
       Advertising Payload: hi"
    );
  }

  #[test]
  fn summary_without_optional_fields_is_three_lines() {
    let advertisement = Advertisement::new(DeviceInfo::new("id-1", None), -90);
    assert_eq!(
      AdvertisementSummary::from(&advertisement).to_string(),
      "Device Name: Unnamed Device\nDevice ID: id-1\nRSSI: -90"
    );
  }
}
