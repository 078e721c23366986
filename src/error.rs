use serde::{ser::Serializer, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Btleplug(#[from] btleplug::Error),
  #[error(transparent)]
  UuidParse(#[from] uuid::Error),
  #[error(transparent)]
  Base64Decode(#[from] base64::DecodeError),
  #[error("Bluetooth scanning is not supported on this platform")]
  UnsupportedPlatform,
  #[error("A scan is already in progress")]
  AlreadyScanning,
  #[error("A connection is already in progress or established")]
  SessionBusy,
  #[error("Device {0} not found")]
  DeviceNotFound(String),
  #[error("Service {service_uuid} not found for device {device_id}")]
  ServiceNotFound {
    device_id: String,
    service_uuid: String,
  },
  #[error("Characteristic {characteristic_uuid} not found for device {device_id}")]
  CharacteristicNotFound {
    device_id: String,
    characteristic_uuid: String,
  },
  #[error("Characteristic {characteristic_uuid} on device {device_id} is not readable")]
  CharacteristicNotReadable {
    device_id: String,
    characteristic_uuid: String,
  },
  #[error("Unexpected value: {0}")]
  InvalidValue(String),
  #[error("Failed to connect to device {device_id}: {reason}")]
  Connection { device_id: String, reason: String },
  #[error("No writable characteristic in service {service_uuid} on device {device_id}")]
  NoWritableCharacteristic {
    device_id: String,
    service_uuid: String,
  },
  #[error("Not connected to a device with a writable characteristic")]
  NotReady,
  #[error("{0}")]
  InvalidRequest(String),
  #[error("{0}")]
  Host(String),
  #[cfg(mobile)]
  #[error(transparent)]
  PluginInvoke(#[from] tauri::plugin::mobile::PluginInvokeError),
}

impl Error {
  /// Lookup failures that leave the session usable and are surfaced as information.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Error::DeviceNotFound(_)
        | Error::ServiceNotFound { .. }
        | Error::CharacteristicNotFound { .. }
        | Error::CharacteristicNotReadable { .. }
        | Error::NoWritableCharacteristic { .. }
    )
  }
}

impl Serialize for Error {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.to_string().as_ref())
  }
}
