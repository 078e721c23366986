use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::{
  format::{hex_dump, AdvertisementSummary},
  models::{DeviceInfo, WorkflowState},
  Error,
};

/// Everything the workflow reports. `Display` yields the log panel line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkflowEvent {
  #[serde(rename_all = "camelCase")]
  StateChanged { state: WorkflowState },
  #[serde(rename_all = "camelCase")]
  ScanStarted { timeout_ms: u64 },
  #[serde(rename_all = "camelCase")]
  ScanStopped { reason: ScanStopReason },
  Advertisement(AdvertisementSummary),
  #[serde(rename_all = "camelCase")]
  Connecting { device: DeviceInfo },
  #[serde(rename_all = "camelCase")]
  BatteryLevel { device_id: String, level: u8 },
  #[serde(rename_all = "camelCase")]
  DeviceIdentified { device: DeviceInfo },
  #[serde(rename_all = "camelCase")]
  Connected {
    device: DeviceInfo,
    write_characteristic: Option<Uuid>,
  },
  #[serde(rename_all = "camelCase")]
  Disconnected { device: DeviceInfo },
  #[serde(rename_all = "camelCase")]
  Rssi { device_id: String, rssi: i16 },
  #[serde(rename_all = "camelCase")]
  Sent { device_id: String, payload: String },
  #[serde(rename_all = "camelCase")]
  Failure { message: String, fatal: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStopReason {
  Timeout,
  DeviceSelected,
  Cancelled,
  StreamEnded,
}

impl WorkflowEvent {
  pub(crate) fn failure(err: &Error) -> Self {
    WorkflowEvent::Failure {
      message: err.to_string(),
      fatal: !err.is_not_found(),
    }
  }

  pub(crate) fn sent(device_id: &str, payload: &[u8]) -> Self {
    WorkflowEvent::Sent {
      device_id: device_id.to_string(),
      payload: hex_dump(payload),
    }
  }
}

impl fmt::Display for WorkflowEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkflowEvent::StateChanged { state } => write!(f, "State: {state:?}"),
      WorkflowEvent::ScanStarted { timeout_ms } => {
        write!(f, "Scanning for devices ({} s)...", timeout_ms / 1000)
      }
      WorkflowEvent::ScanStopped { reason } => match reason {
        ScanStopReason::Timeout => write!(f, "Scanning stopped: no device selected before timeout"),
        ScanStopReason::DeviceSelected => write!(f, "Scanning stopped: device selected"),
        ScanStopReason::Cancelled => write!(f, "Scanning stopped"),
        ScanStopReason::StreamEnded => write!(f, "Scanning stopped by host"),
      },
      WorkflowEvent::Advertisement(summary) => write!(f, "{summary}"),
      WorkflowEvent::Connecting { device } => {
        write!(f, "Connecting to GATT server of {}...", device.display_name())
      }
      WorkflowEvent::BatteryLevel { level, .. } => write!(f, "Battery level is {level}%"),
      WorkflowEvent::DeviceIdentified { device } => write!(
        f,
        "Device Name: {}\nDevice ID (MAC Address): {}",
        device.display_name(),
        device.id
      ),
      WorkflowEvent::Connected {
        device,
        write_characteristic,
      } => match write_characteristic {
        Some(uuid) => write!(
          f,
          "Connected to {} | write characteristic {uuid}",
          device.display_name()
        ),
        None => write!(f, "Connected to {} | no write characteristic", device.display_name()),
      },
      WorkflowEvent::Disconnected { device } => {
        write!(f, "Device {} is disconnected.", device.display_name())
      }
      WorkflowEvent::Rssi { rssi, .. } => write!(f, "RSSI: {rssi}"),
      WorkflowEvent::Sent { payload, .. } => write!(f, "Sent: {payload}"),
      WorkflowEvent::Failure { message, .. } => write!(f, "Error: {message}"),
    }
  }
}

/// Receives workflow output; the UI collaborator renders it.
pub trait WorkflowSink: Send + Sync + 'static {
  fn report(&self, event: WorkflowEvent);
}

impl<F> WorkflowSink for F
where
  F: Fn(WorkflowEvent) + Send + Sync + 'static,
{
  fn report(&self, event: WorkflowEvent) {
    (self)(event)
  }
}

/// Forwards every event to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl WorkflowSink for LogSink {
  fn report(&self, event: WorkflowEvent) {
    match &event {
      WorkflowEvent::Failure { fatal: true, .. } => log::error!("{event}"),
      WorkflowEvent::Failure { fatal: false, .. } => log::warn!("{event}"),
      WorkflowEvent::Advertisement(_) | WorkflowEvent::Rssi { .. } => log::debug!("{event}"),
      _ => log::info!("{event}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn battery_and_disconnect_lines() {
    assert_eq!(
      WorkflowEvent::BatteryLevel {
        device_id: "d".into(),
        level: 75
      }
      .to_string(),
      "Battery level is 75%"
    );
    assert_eq!(
      WorkflowEvent::Disconnected {
        device: DeviceInfo::new("d", Some("Thermo"))
      }
      .to_string(),
      "Device Thermo is disconnected."
    );
  }

  #[test]
  fn not_found_failures_are_not_fatal() {
    let event = WorkflowEvent::failure(&Error::ServiceNotFound {
      device_id: "d".into(),
      service_uuid: "180a".into(),
    });
    assert!(matches!(event, WorkflowEvent::Failure { fatal: false, .. }));
    assert!(matches!(
      WorkflowEvent::failure(&Error::NotReady),
      WorkflowEvent::Failure { fatal: true, .. }
    ));
  }

  #[test]
  fn sent_event_renders_hex() {
    assert_eq!(WorkflowEvent::sent("d", b"ABC").to_string(), "Sent: 41 42 43 ");
  }
}
