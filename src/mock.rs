//! In-memory host binding for tests.
//!
//! [`MockHost`] implements [`BluetoothHost`] over a table of [`MockDevice`]s.
//! Tests push advertisements into the running scan, trigger disconnects and
//! inspect every connect and write the workflow issued. [`RecordingSink`]
//! collects the reported [`WorkflowEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use uuid::Uuid;

use crate::{
  gatt::{
    BATTERY_LEVEL, BATTERY_SERVICE, DEVICE_INFORMATION, MANUFACTURER_NAME_STRING,
    MODEL_NUMBER_STRING,
  },
  host::*,
  models::{Advertisement, CharacteristicProperties, DeviceInfo},
  sink::{WorkflowEvent, WorkflowSink},
  Error, Result,
};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A write observed by the mock host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
  pub device_id: String,
  pub characteristic: Uuid,
  pub payload: Vec<u8>,
  pub with_response: bool,
}

#[derive(Debug, Clone)]
pub struct MockCharacteristicSpec {
  pub uuid: Uuid,
  pub properties: CharacteristicProperties,
  pub value: Vec<u8>,
}

impl MockCharacteristicSpec {
  pub fn readable(uuid: Uuid, value: Vec<u8>) -> Self {
    Self {
      uuid,
      properties: CharacteristicProperties {
        read: true,
        ..CharacteristicProperties::default()
      },
      value,
    }
  }

  pub fn writable(uuid: Uuid) -> Self {
    Self {
      uuid,
      properties: CharacteristicProperties {
        read: true,
        write: true,
        ..CharacteristicProperties::default()
      },
      value: Vec::new(),
    }
  }

  pub fn write_without_response(uuid: Uuid) -> Self {
    Self {
      uuid,
      properties: CharacteristicProperties {
        write_without_response: true,
        ..CharacteristicProperties::default()
      },
      value: Vec::new(),
    }
  }
}

/// A peripheral known to the mock host.
#[derive(Debug, Clone)]
pub struct MockDevice {
  pub info: DeviceInfo,
  pub rssi: i16,
  pub refuse_connection: bool,
  /// Delay applied to every characteristic read.
  pub read_latency: Duration,
  pub services: Vec<(Uuid, Vec<MockCharacteristicSpec>)>,
}

impl MockDevice {
  /// Battery service reporting `battery` and a device information service
  /// whose first writable characteristic is the model number string.
  pub fn new(id: &str, name: &str, battery: u8) -> Self {
    Self {
      info: DeviceInfo::new(id, Some(name)),
      rssi: -55,
      refuse_connection: false,
      read_latency: Duration::ZERO,
      services: vec![
        (
          BATTERY_SERVICE,
          vec![MockCharacteristicSpec::readable(BATTERY_LEVEL, vec![battery])],
        ),
        (
          DEVICE_INFORMATION,
          vec![
            MockCharacteristicSpec::readable(MANUFACTURER_NAME_STRING, b"Mock".to_vec()),
            MockCharacteristicSpec::writable(MODEL_NUMBER_STRING),
          ],
        ),
      ],
    }
  }

  pub fn without_service(mut self, uuid: Uuid) -> Self {
    self.services.retain(|(service, _)| *service != uuid);
    self
  }

  pub fn with_service(mut self, uuid: Uuid, characteristics: Vec<MockCharacteristicSpec>) -> Self {
    self.services.retain(|(service, _)| *service != uuid);
    self.services.push((uuid, characteristics));
    self
  }

  pub fn refusing_connection(mut self) -> Self {
    self.refuse_connection = true;
    self
  }

  pub fn with_read_latency(mut self, latency: Duration) -> Self {
    self.read_latency = latency;
    self
  }

  pub fn advertisement(&self) -> Advertisement {
    Advertisement::new(self.info.clone(), self.rssi)
  }
}

#[derive(Default)]
struct MockHostState {
  unavailable: AtomicBool,
  devices: StdMutex<HashMap<String, MockDevice>>,
  scanners: StdMutex<Vec<UnboundedSender<Advertisement>>>,
  scan_requests: StdMutex<Vec<ScanRequest>>,
  stop_scan_calls: AtomicUsize,
  stop_scan_latency: StdMutex<Duration>,
  operations: StdMutex<Vec<String>>,
  connect_calls: StdMutex<Vec<String>>,
  writes: Arc<StdMutex<Vec<MockWrite>>>,
  watchers: StdMutex<HashMap<String, Vec<Arc<DisconnectCallback>>>>,
}

#[derive(Clone, Default)]
pub struct MockHost {
  inner: Arc<MockHostState>,
}

impl MockHost {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_available(&self, available: bool) {
    self.inner.unavailable.store(!available, Ordering::SeqCst);
  }

  /// Delay applied to every `stop_scan` before the running scans are closed.
  pub fn set_stop_scan_latency(&self, latency: Duration) {
    *lock(&self.inner.stop_scan_latency) = latency;
  }

  pub fn add_device(&self, device: MockDevice) {
    lock(&self.inner.devices).insert(device.info.id.clone(), device);
  }

  /// Delivers an advertisement to every running scan. Returns `false` if none is running.
  pub fn advertise(&self, advertisement: Advertisement) -> bool {
    let mut scanners = lock(&self.inner.scanners);
    scanners.retain(|sender| sender.unbounded_send(advertisement.clone()).is_ok());
    !scanners.is_empty()
  }

  /// Fires every disconnect observer registered for `device_id`.
  pub fn drop_connection(&self, device_id: &str) {
    let callbacks = lock(&self.inner.watchers)
      .get(device_id)
      .cloned()
      .unwrap_or_default();
    for callback in callbacks {
      (callback.as_ref())(device_id);
    }
  }

  pub fn watcher_count(&self, device_id: &str) -> usize {
    lock(&self.inner.watchers)
      .get(device_id)
      .map(Vec::len)
      .unwrap_or(0)
  }

  pub fn is_scanning(&self) -> bool {
    lock(&self.inner.scanners)
      .iter()
      .any(|sender| !sender.is_closed())
  }

  pub fn scan_requests(&self) -> Vec<ScanRequest> {
    lock(&self.inner.scan_requests).clone()
  }

  pub fn stop_scan_calls(&self) -> usize {
    self.inner.stop_scan_calls.load(Ordering::SeqCst)
  }

  pub fn connect_calls(&self) -> Vec<String> {
    lock(&self.inner.connect_calls).clone()
  }

  pub fn writes(&self) -> Vec<MockWrite> {
    lock(&self.inner.writes).clone()
  }

  /// Connects, observer registrations and service lookups in call order,
  /// e.g. `connect D`, `watch D`, `service D <uuid>`.
  pub fn operations(&self) -> Vec<String> {
    lock(&self.inner.operations).clone()
  }
}

impl MockHostState {
  fn record(&self, operation: String) {
    lock(&self.operations).push(operation);
  }
}

impl BluetoothHost for MockHost {
  fn is_available(&self) -> BoxFuture<'_, Result<bool>> {
    let available = !self.inner.unavailable.load(Ordering::SeqCst);
    async move { Ok(available) }.boxed()
  }

  fn start_scan(&self, request: ScanRequest) -> BoxFuture<'_, Result<AdvertisementStream>> {
    async move {
      lock(&self.inner.scan_requests).push(request);
      let (sender, receiver) = unbounded();
      lock(&self.inner.scanners).push(sender);
      Ok(receiver.boxed())
    }
    .boxed()
  }

  fn stop_scan(&self) -> BoxFuture<'_, Result<()>> {
    async move {
      self.inner.stop_scan_calls.fetch_add(1, Ordering::SeqCst);
      let latency = *lock(&self.inner.stop_scan_latency);
      if !latency.is_zero() {
        tokio::time::sleep(latency).await;
      }
      for sender in lock(&self.inner.scanners).drain(..) {
        sender.close_channel();
      }
      Ok(())
    }
    .boxed()
  }

  fn connect(&self, device_id: &str) -> BoxFuture<'_, Result<Arc<dyn GattSession>>> {
    let device_id = device_id.to_string();
    async move {
      lock(&self.inner.connect_calls).push(device_id.clone());
      self.inner.record(format!("connect {device_id}"));
      let device = lock(&self.inner.devices).get(&device_id).cloned();
      let device = match device {
        Some(device) if device.refuse_connection => {
          return Err(Error::Host("connection refused".into()));
        }
        Some(device) => device,
        None => return Err(Error::DeviceNotFound(device_id)),
      };
      Ok::<_, Error>(Arc::new(MockGatt::attached(device, self.inner.clone())) as Arc<dyn GattSession>)
    }
    .boxed()
  }
}

/// GATT session over a [`MockDevice`].
pub struct MockGatt {
  device_id: String,
  rssi: i16,
  services: Vec<Arc<MockService>>,
  host: Option<Arc<MockHostState>>,
}

impl MockGatt {
  fn attached(device: MockDevice, host: Arc<MockHostState>) -> Self {
    let services = device
      .services
      .iter()
      .map(|(uuid, specs)| {
        Arc::new(MockService {
          device_id: device.info.id.clone(),
          uuid: *uuid,
          characteristics: specs
            .iter()
            .map(|spec| {
              Arc::new(MockCharacteristic {
                device_id: device.info.id.clone(),
                uuid: spec.uuid,
                properties: spec.properties,
                value: StdMutex::new(spec.value.clone()),
                read_latency: device.read_latency,
                writes: host.writes.clone(),
              })
            })
            .collect(),
        })
      })
      .collect();
    Self {
      device_id: device.info.id.clone(),
      rssi: device.rssi,
      services,
      host: Some(host),
    }
  }

  /// A session with no services and no host behind it.
  pub fn detached(device_id: &str) -> Self {
    Self {
      device_id: device_id.to_string(),
      rssi: -60,
      services: Vec::new(),
      host: None,
    }
  }
}

impl GattSession for MockGatt {
  fn device_id(&self) -> &str {
    &self.device_id
  }

  fn primary_service(&self, uuid: Uuid) -> BoxFuture<'_, Result<Arc<dyn GattService>>> {
    if let Some(host) = &self.host {
      host.record(format!("service {} {uuid}", self.device_id));
    }
    let service = self
      .services
      .iter()
      .find(|service| service.uuid == uuid)
      .map(|service| service.clone() as Arc<dyn GattService>)
      .ok_or_else(|| Error::ServiceNotFound {
        device_id: self.device_id.clone(),
        service_uuid: uuid.to_string(),
      });
    async move { service }.boxed()
  }

  fn on_disconnected(&self, callback: DisconnectCallback) {
    if let Some(host) = &self.host {
      host.record(format!("watch {}", self.device_id));
      lock(&host.watchers)
        .entry(self.device_id.clone())
        .or_default()
        .push(Arc::new(callback));
    }
  }

  fn read_rssi(&self) -> BoxFuture<'_, Result<Option<i16>>> {
    let rssi = self.rssi;
    async move { Ok(Some(rssi)) }.boxed()
  }

  fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
    async move {
      if let Some(host) = &self.host {
        let callbacks = lock(&host.watchers).remove(&self.device_id).unwrap_or_default();
        for callback in callbacks {
          (callback.as_ref())(&self.device_id);
        }
      }
      Ok(())
    }
    .boxed()
  }
}

pub struct MockService {
  device_id: String,
  uuid: Uuid,
  characteristics: Vec<Arc<MockCharacteristic>>,
}

impl GattService for MockService {
  fn uuid(&self) -> Uuid {
    self.uuid
  }

  fn characteristic(&self, uuid: Uuid) -> BoxFuture<'_, Result<Arc<dyn GattCharacteristic>>> {
    let characteristic = self
      .characteristics
      .iter()
      .find(|characteristic| characteristic.uuid == uuid)
      .map(|characteristic| characteristic.clone() as Arc<dyn GattCharacteristic>)
      .ok_or_else(|| Error::CharacteristicNotFound {
        device_id: self.device_id.clone(),
        characteristic_uuid: uuid.to_string(),
      });
    async move { characteristic }.boxed()
  }

  fn characteristics(&self) -> BoxFuture<'_, Result<Vec<Arc<dyn GattCharacteristic>>>> {
    let characteristics = self
      .characteristics
      .iter()
      .map(|characteristic| characteristic.clone() as Arc<dyn GattCharacteristic>)
      .collect();
    async move { Ok(characteristics) }.boxed()
  }
}

pub struct MockCharacteristic {
  device_id: String,
  uuid: Uuid,
  properties: CharacteristicProperties,
  value: StdMutex<Vec<u8>>,
  read_latency: Duration,
  writes: Arc<StdMutex<Vec<MockWrite>>>,
}

impl MockCharacteristic {
  pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
    Self {
      device_id: String::new(),
      uuid,
      properties,
      value: StdMutex::new(Vec::new()),
      read_latency: Duration::ZERO,
      writes: Arc::default(),
    }
  }
}

impl GattCharacteristic for MockCharacteristic {
  fn uuid(&self) -> Uuid {
    self.uuid
  }

  fn properties(&self) -> CharacteristicProperties {
    self.properties
  }

  fn read(&self) -> BoxFuture<'_, Result<Vec<u8>>> {
    async move {
      if !self.read_latency.is_zero() {
        tokio::time::sleep(self.read_latency).await;
      }
      if !self.properties.read {
        return Err(Error::Host("read not permitted".into()));
      }
      Ok(lock(&self.value).clone())
    }
    .boxed()
  }

  fn write<'a>(&'a self, payload: &'a [u8], with_response: bool) -> BoxFuture<'a, Result<()>> {
    async move {
      if !self.properties.is_writable() {
        return Err(Error::Host("write not permitted".into()));
      }
      *lock(&self.value) = payload.to_vec();
      lock(&self.writes).push(MockWrite {
        device_id: self.device_id.clone(),
        characteristic: self.uuid,
        payload: payload.to_vec(),
        with_response,
      });
      Ok(())
    }
    .boxed()
  }
}

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
  events: StdMutex<Vec<WorkflowEvent>>,
}

impl RecordingSink {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn events(&self) -> Vec<WorkflowEvent> {
    lock(&self.events).clone()
  }

  pub fn lines(&self) -> Vec<String> {
    self.events().iter().map(ToString::to_string).collect()
  }

  pub fn count<F>(&self, predicate: F) -> usize
  where
    F: Fn(&WorkflowEvent) -> bool,
  {
    lock(&self.events).iter().filter(|event| predicate(event)).count()
  }

  /// Polls until an event matching `predicate` was reported, for up to five seconds.
  pub async fn wait_for<F>(&self, predicate: F) -> Option<WorkflowEvent>
  where
    F: Fn(&WorkflowEvent) -> bool,
  {
    for _ in 0..500 {
      let found = lock(&self.events).iter().find(|event| predicate(event)).cloned();
      if found.is_some() {
        return found;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
  }
}

impl WorkflowSink for RecordingSink {
  fn report(&self, event: WorkflowEvent) {
    lock(&self.events).push(event);
  }
}
