use std::collections::BTreeMap;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

pub const EVENT_LOG: &str = "ble-workflow://log";
pub const EVENT_WORKFLOW: &str = "ble-workflow://event";

/// Plugin configuration, read from `plugins.ble-workflow` in `tauri.conf.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
  #[serde(default = "default_scan_timeout_ms")]
  pub scan_timeout_ms: u64,
  #[serde(default = "default_battery_service")]
  pub battery_service: String,
  #[serde(default = "default_write_service")]
  pub write_service: String,
  /// `0` disables RSSI polling once connected.
  #[serde(default = "default_rssi_poll_interval_ms")]
  pub rssi_poll_interval_ms: u64,
}

fn default_scan_timeout_ms() -> u64 {
  30_000
}

fn default_battery_service() -> String {
  "battery_service".into()
}

fn default_write_service() -> String {
  "device_information".into()
}

fn default_rssi_poll_interval_ms() -> u64 {
  30_000
}

impl Default for Config {
  fn default() -> Self {
    Self {
      scan_timeout_ms: default_scan_timeout_ms(),
      battery_service: default_battery_service(),
      write_service: default_write_service(),
      rssi_poll_interval_ms: default_rssi_poll_interval_ms(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
  #[serde(default)]
  pub accept_all_devices: bool,
  #[serde(default)]
  pub filters: Vec<DeviceFilter>,
  #[serde(default)]
  pub optional_services: Vec<String>,
  /// Overrides the configured scan duration for this scan only.
  pub scan_timeout_ms: Option<u64>,
}

impl ScanOptions {
  pub fn accept_all() -> Self {
    Self {
      accept_all_devices: true,
      ..Self::default()
    }
  }

  pub fn name_prefixes<I, S>(prefixes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      filters: prefixes
        .into_iter()
        .map(|prefix| DeviceFilter {
          name_prefix: Some(prefix.into()),
          ..DeviceFilter::default()
        })
        .collect(),
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
  #[serde(default)]
  pub services: Vec<String>,
  pub name: Option<String>,
  pub name_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
  pub id: String,
  pub name: Option<String>,
}

impl DeviceInfo {
  pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
    Self {
      id: id.into(),
      name: name.map(str::to_string),
    }
  }

  pub fn display_name(&self) -> &str {
    self.name.as_deref().unwrap_or("Unnamed Device")
  }
}

/// One advertisement as delivered by the host scan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
  pub device: DeviceInfo,
  pub rssi: i16,
  pub tx_power: Option<i16>,
  #[serde(default)]
  pub services: Vec<Uuid>,
  #[serde(default)]
  pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
  #[serde(default)]
  pub service_data: BTreeMap<Uuid, Vec<u8>>,
}

impl Advertisement {
  pub fn new(device: DeviceInfo, rssi: i16) -> Self {
    Self {
      device,
      rssi,
      tx_power: None,
      services: Vec::new(),
      manufacturer_data: BTreeMap::new(),
      service_data: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicProperties {
  pub broadcast: bool,
  pub read: bool,
  pub write_without_response: bool,
  pub write: bool,
  pub notify: bool,
  pub indicate: bool,
  pub authenticated_signed_writes: bool,
}

impl CharacteristicProperties {
  pub fn is_writable(&self) -> bool {
    self.write || self.write_without_response
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadEncoding {
  #[default]
  Text,
  Base64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
  pub value: String,
  #[serde(default)]
  pub encoding: PayloadEncoding,
}

impl TryFrom<SendRequest> for Payload {
  type Error = crate::Error;

  fn try_from(request: SendRequest) -> Result<Self> {
    match request.encoding {
      PayloadEncoding::Text => Ok(Payload::Text(request.value)),
      PayloadEncoding::Base64 => Ok(Payload::Bytes(BASE64_STANDARD.decode(request.value)?)),
    }
  }
}

/// Data handed to `send`: text is encoded as UTF-8, bytes go out untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
  Text(String),
  Bytes(Vec<u8>),
}

impl Payload {
  pub fn into_bytes(self) -> Vec<u8> {
    match self {
      Payload::Text(text) => text.into_bytes(),
      Payload::Bytes(bytes) => bytes,
    }
  }
}

impl From<&str> for Payload {
  fn from(value: &str) -> Self {
    Payload::Text(value.to_string())
  }
}

impl From<String> for Payload {
  fn from(value: String) -> Self {
    Payload::Text(value)
  }
}

impl From<Vec<u8>> for Payload {
  fn from(value: Vec<u8>) -> Self {
    Payload::Bytes(value)
  }
}

impl From<&[u8]> for Payload {
  fn from(value: &[u8]) -> Self {
    Payload::Bytes(value.to_vec())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowState {
  Idle,
  Scanning,
  Connecting,
  Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
  pub state: WorkflowState,
  pub device: Option<DeviceInfo>,
  pub write_characteristic: Option<Uuid>,
  pub scanning: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
  pub message: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_defaults_apply_to_missing_fields() {
    let config: Config = serde_json::from_str(r#"{ "scanTimeoutMs": 5000 }"#).unwrap();
    assert_eq!(config.scan_timeout_ms, 5000);
    assert_eq!(config.write_service, "device_information");
    assert_eq!(config.battery_service, "battery_service");
    assert_eq!(config.rssi_poll_interval_ms, 30_000);
  }

  #[test]
  fn scan_options_deserialize_from_camel_case() {
    let options: ScanOptions = serde_json::from_str(
      r#"{ "filters": [{ "namePrefix": "Nordic" }], "optionalServices": ["battery_service"] }"#,
    )
    .unwrap();
    assert!(!options.accept_all_devices);
    assert_eq!(options.filters[0].name_prefix.as_deref(), Some("Nordic"));
    assert_eq!(options.optional_services, vec!["battery_service"]);
    assert_eq!(options.scan_timeout_ms, None);
  }

  #[test]
  fn text_payload_is_utf8() {
    assert_eq!(Payload::from("ABC").into_bytes(), vec![0x41, 0x42, 0x43]);
    assert_eq!(Payload::from("é").into_bytes(), vec![0xC3, 0xA9]);
  }

  #[test]
  fn base64_request_decodes_to_bytes() {
    let request = SendRequest {
      value: "AasA".into(),
      encoding: PayloadEncoding::Base64,
    };
    assert_eq!(
      Payload::try_from(request).unwrap(),
      Payload::Bytes(vec![0x01, 0xAB, 0x00])
    );
  }

  #[test]
  fn invalid_base64_is_rejected() {
    let request = SendRequest {
      value: "!!".into(),
      encoding: PayloadEncoding::Base64,
    };
    assert!(matches!(
      Payload::try_from(request),
      Err(crate::Error::Base64Decode(_))
    ));
  }
}
