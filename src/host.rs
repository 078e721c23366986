//! Seams between the workflow and the platform Bluetooth stack.
//!
//! Futures are boxed so the traits stay object safe; the controller holds
//! every handle behind an `Arc<dyn _>`.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::models::{Advertisement, CharacteristicProperties};
use crate::Result;

pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Invoked by the host with the device id once the link drops.
pub type DisconnectCallback = Box<dyn Fn(&str) + Send + Sync>;

/// What the host needs to know to start scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
  pub accept_all_devices: bool,
  /// Services the page is allowed to use once connected.
  pub optional_services: Vec<Uuid>,
}

pub trait BluetoothHost: Send + Sync + 'static {
  fn is_available(&self) -> BoxFuture<'_, Result<bool>>;

  fn start_scan(&self, request: ScanRequest) -> BoxFuture<'_, Result<AdvertisementStream>>;

  fn stop_scan(&self) -> BoxFuture<'_, Result<()>>;

  fn connect(&self, device_id: &str) -> BoxFuture<'_, Result<Arc<dyn GattSession>>>;
}

pub trait GattSession: Send + Sync {
  fn device_id(&self) -> &str;

  fn primary_service(&self, uuid: Uuid) -> BoxFuture<'_, Result<Arc<dyn GattService>>>;

  /// Registers the observer; it must fire for disconnects that happen after this call returns.
  fn on_disconnected(&self, callback: DisconnectCallback);

  fn read_rssi(&self) -> BoxFuture<'_, Result<Option<i16>>>;

  fn disconnect(&self) -> BoxFuture<'_, Result<()>>;
}

pub trait GattService: Send + Sync {
  fn uuid(&self) -> Uuid;

  fn characteristic(&self, uuid: Uuid) -> BoxFuture<'_, Result<Arc<dyn GattCharacteristic>>>;

  fn characteristics(&self) -> BoxFuture<'_, Result<Vec<Arc<dyn GattCharacteristic>>>>;
}

pub trait GattCharacteristic: Send + Sync {
  fn uuid(&self) -> Uuid;

  fn properties(&self) -> CharacteristicProperties;

  fn read(&self) -> BoxFuture<'_, Result<Vec<u8>>>;

  fn write<'a>(&'a self, payload: &'a [u8], with_response: bool) -> BoxFuture<'a, Result<()>>;
}
