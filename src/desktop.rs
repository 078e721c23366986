use std::{
  collections::HashMap,
  marker::PhantomData,
  sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
};

use btleplug::{
  api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, Service, WriteType,
  },
  platform::{Adapter, Manager as BtleManager, Peripheral},
};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use tauri::{
  async_runtime::{self, RwLock},
  plugin::PluginApi,
  AppHandle, Emitter, Runtime,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::{
  controller::{BleWorkflow, WorkflowConfig},
  host::*,
  models::*,
  sink::{LogSink, WorkflowEvent, WorkflowSink},
  Error, Result,
};

pub fn init<R: Runtime, C: DeserializeOwned>(
  app: &AppHandle<R>,
  _api: PluginApi<R, C>,
  config: &Config,
) -> Result<Workflow<R>> {
  let workflow_config = WorkflowConfig::try_from(config)?;
  let host = async_runtime::block_on(BtleplugHost::new())?;
  let sink = TauriSink { app: app.clone() };
  Ok(Workflow {
    controller: BleWorkflow::new(Arc::new(host), Arc::new(sink), workflow_config),
    _runtime: PhantomData,
  })
}

/// Access to the BLE workflow.
pub struct Workflow<R: Runtime> {
  controller: BleWorkflow,
  _runtime: PhantomData<fn() -> R>,
}

impl<R: Runtime> Workflow<R> {
  pub fn controller(&self) -> &BleWorkflow {
    &self.controller
  }

  pub async fn get_availability(&self) -> Result<bool> {
    self.controller.is_available().await
  }

  pub async fn start_scan(&self, options: ScanOptions) -> Result<()> {
    self.controller.start_scan(options).await
  }

  pub async fn stop_scan(&self) -> Result<()> {
    self.controller.stop_scan().await
  }

  pub async fn send(&self, request: SendRequest) -> Result<()> {
    let payload = Payload::try_from(request)?;
    self.controller.send(payload).await
  }

  pub async fn disconnect(&self) -> Result<()> {
    self.controller.disconnect().await
  }

  pub fn session(&self) -> Result<SessionSnapshot> {
    Ok(self.controller.snapshot())
  }
}

/// Emits each workflow event to the webview, both as a log line and structured.
struct TauriSink<R: Runtime> {
  app: AppHandle<R>,
}

impl<R: Runtime> WorkflowSink for TauriSink<R> {
  fn report(&self, event: WorkflowEvent) {
    LogSink.report(event.clone());
    let line = LogLine {
      message: event.to_string(),
    };
    if let Err(err) = self.app.emit(EVENT_LOG, line) {
      log::warn!("Failed to emit log line | event={} | err={:?}", EVENT_LOG, err);
    }
    if let Err(err) = self.app.emit(EVENT_WORKFLOW, event) {
      log::warn!("Failed to emit workflow event | event={} | err={:?}", EVENT_WORKFLOW, err);
    }
  }
}

/// [`BluetoothHost`] over the first adapter `btleplug` reports.
pub struct BtleplugHost {
  inner: Arc<BtleplugState>,
}

struct BtleplugState {
  manager: BtleManager,
  adapter: Option<Adapter>,
  peripherals: RwLock<HashMap<String, Peripheral>>,
  watchers: StdMutex<HashMap<String, DisconnectCallback>>,
}

impl BtleplugHost {
  pub async fn new() -> Result<Self> {
    let manager = BtleManager::new().await?;
    let adapter = manager.adapters().await?.into_iter().next();
    if adapter.is_none() {
      log::warn!("No Bluetooth adapter found, scanning will be unavailable");
    }
    let state = Arc::new(BtleplugState {
      manager,
      adapter,
      peripherals: RwLock::new(HashMap::new()),
      watchers: StdMutex::new(HashMap::new()),
    });
    state.spawn_event_listener();
    Ok(Self { inner: state })
  }
}

impl BluetoothHost for BtleplugHost {
  fn is_available(&self) -> BoxFuture<'_, Result<bool>> {
    async move {
      if self.inner.adapter.is_none() {
        return Ok(false);
      }
      Ok::<_, Error>(!self.inner.manager.adapters().await?.is_empty())
    }
    .boxed()
  }

  fn start_scan(&self, request: ScanRequest) -> BoxFuture<'_, Result<AdvertisementStream>> {
    async move {
      let adapter = self.inner.adapter()?;
      log::info!(
        "Starting advertisement scan | accept_all_devices={} | optional_services={}",
        request.accept_all_devices,
        request.optional_services.len()
      );
      let events = adapter.events().await?;
      adapter.start_scan(ScanFilter::default()).await?;
      let state = self.inner.clone();
      let stream = events
        .filter_map(move |event| {
          let state = state.clone();
          async move { state.advertisement_for(event).await }
        })
        .boxed();
      Ok::<_, Error>(stream)
    }
    .boxed()
  }

  fn stop_scan(&self) -> BoxFuture<'_, Result<()>> {
    async move {
      self.inner.adapter()?.stop_scan().await?;
      Ok::<_, Error>(())
    }
    .boxed()
  }

  fn connect(&self, device_id: &str) -> BoxFuture<'_, Result<Arc<dyn GattSession>>> {
    let device_id = device_id.to_string();
    async move {
      let peripheral = self.inner.get_or_try_load_peripheral(&device_id).await?;
      if !peripheral.is_connected().await.unwrap_or(false) {
        peripheral.connect().await?;
      }
      let gatt = BtleGatt {
        device_id,
        peripheral,
        host: self.inner.clone(),
        discovered: OnceCell::new(),
      };
      Ok::<_, Error>(Arc::new(gatt) as Arc<dyn GattSession>)
    }
    .boxed()
  }
}

impl BtleplugState {
  fn adapter(&self) -> Result<&Adapter> {
    self.adapter.as_ref().ok_or(Error::UnsupportedPlatform)
  }

  fn watchers(&self) -> MutexGuard<'_, HashMap<String, DisconnectCallback>> {
    self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn spawn_event_listener(self: &Arc<Self>) {
    let Some(adapter) = self.adapter.clone() else {
      return;
    };
    let state = self.clone();
    async_runtime::spawn(async move {
      let events = adapter.events().await;
      let mut events = match events {
        Ok(stream) => stream,
        Err(err) => {
          log::error!("Failed to subscribe to Bluetooth adapter events: {err}");
          return;
        }
      };
      while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(id) = event {
          if let Ok(peripheral) = adapter.peripheral(&id).await {
            let device_id = peripheral_key(&peripheral);
            let callback = state.watchers().remove(&device_id);
            if let Some(callback) = callback {
              callback(&device_id);
            }
          }
        }
      }
    });
  }

  async fn advertisement_for(&self, event: CentralEvent) -> Option<Advertisement> {
    let id = match event {
      CentralEvent::DeviceDiscovered(id)
      | CentralEvent::DeviceUpdated(id)
      | CentralEvent::ManufacturerDataAdvertisement { id, .. }
      | CentralEvent::ServiceDataAdvertisement { id, .. }
      | CentralEvent::ServicesAdvertisement { id, .. } => id,
      _ => return None,
    };
    let adapter = self.adapter.as_ref()?;
    let peripheral = adapter.peripheral(&id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let device_id = peripheral_key(&peripheral);
    let Some(rssi) = properties.rssi else {
      log::debug!("Skipping advertisement without RSSI | device_id={device_id}");
      return None;
    };
    self
      .peripherals
      .write()
      .await
      .insert(device_id.clone(), peripheral);
    Some(advertisement_from(device_id, rssi, properties))
  }

  async fn get_or_try_load_peripheral(&self, device_id: &str) -> Result<Peripheral> {
    if let Some(peripheral) = self.peripherals.read().await.get(device_id) {
      return Ok(peripheral.clone());
    }
    let peripherals = self.adapter()?.peripherals().await?;
    for peripheral in peripherals {
      if peripheral_key(&peripheral) == device_id {
        let mut cache = self.peripherals.write().await;
        cache.insert(device_id.to_string(), peripheral.clone());
        return Ok(peripheral);
      }
    }
    Err(Error::DeviceNotFound(device_id.to_string()))
  }
}

struct BtleGatt {
  device_id: String,
  peripheral: Peripheral,
  host: Arc<BtleplugState>,
  discovered: OnceCell<()>,
}

impl BtleGatt {
  /// Service discovery runs on the first lookup, after the disconnect observer is registered.
  async fn discover(&self) -> Result<()> {
    self
      .discovered
      .get_or_try_init(|| async {
        log::debug!("Discovering services | device_id={}", self.device_id);
        self.peripheral.discover_services().await.map_err(Error::from)
      })
      .await?;
    Ok(())
  }
}

impl GattSession for BtleGatt {
  fn device_id(&self) -> &str {
    &self.device_id
  }

  fn primary_service(&self, uuid: Uuid) -> BoxFuture<'_, Result<Arc<dyn GattService>>> {
    async move {
      self.discover().await?;
      let service = self
        .peripheral
        .services()
        .into_iter()
        .find(|service| service.uuid == uuid)
        .ok_or_else(|| Error::ServiceNotFound {
          device_id: self.device_id.clone(),
          service_uuid: uuid.to_string(),
        })?;
      Ok::<_, Error>(Arc::new(BtleService {
        device_id: self.device_id.clone(),
        peripheral: self.peripheral.clone(),
        service,
      }) as Arc<dyn GattService>)
    }
    .boxed()
  }

  fn on_disconnected(&self, callback: DisconnectCallback) {
    self.host.watchers().insert(self.device_id.clone(), callback);
  }

  fn read_rssi(&self) -> BoxFuture<'_, Result<Option<i16>>> {
    async move {
      let properties = self.peripheral.properties().await?;
      Ok::<_, Error>(properties.and_then(|properties| properties.rssi))
    }
    .boxed()
  }

  fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
    async move {
      if self.peripheral.is_connected().await.unwrap_or(false) {
        self.peripheral.disconnect().await?;
      }
      Ok::<_, Error>(())
    }
    .boxed()
  }
}

struct BtleService {
  device_id: String,
  peripheral: Peripheral,
  service: Service,
}

impl BtleService {
  fn wrap(&self, characteristic: &Characteristic) -> Arc<dyn GattCharacteristic> {
    Arc::new(BtleCharacteristic {
      peripheral: self.peripheral.clone(),
      characteristic: characteristic.clone(),
    })
  }
}

impl GattService for BtleService {
  fn uuid(&self) -> Uuid {
    self.service.uuid
  }

  fn characteristic(&self, uuid: Uuid) -> BoxFuture<'_, Result<Arc<dyn GattCharacteristic>>> {
    let characteristic = self
      .service
      .characteristics
      .iter()
      .find(|characteristic| characteristic.uuid == uuid)
      .map(|characteristic| self.wrap(characteristic))
      .ok_or_else(|| Error::CharacteristicNotFound {
        device_id: self.device_id.clone(),
        characteristic_uuid: uuid.to_string(),
      });
    async move { characteristic }.boxed()
  }

  fn characteristics(&self) -> BoxFuture<'_, Result<Vec<Arc<dyn GattCharacteristic>>>> {
    let characteristics = self
      .service
      .characteristics
      .iter()
      .map(|characteristic| self.wrap(characteristic))
      .collect();
    async move { Ok(characteristics) }.boxed()
  }
}

struct BtleCharacteristic {
  peripheral: Peripheral,
  characteristic: Characteristic,
}

impl GattCharacteristic for BtleCharacteristic {
  fn uuid(&self) -> Uuid {
    self.characteristic.uuid
  }

  fn properties(&self) -> CharacteristicProperties {
    characteristic_properties(self.characteristic.properties)
  }

  fn read(&self) -> BoxFuture<'_, Result<Vec<u8>>> {
    async move { Ok::<_, Error>(self.peripheral.read(&self.characteristic).await?) }.boxed()
  }

  fn write<'a>(&'a self, payload: &'a [u8], with_response: bool) -> BoxFuture<'a, Result<()>> {
    let write_type = if with_response {
      WriteType::WithResponse
    } else {
      WriteType::WithoutResponse
    };
    async move {
      self
        .peripheral
        .write(&self.characteristic, payload, write_type)
        .await?;
      Ok::<_, Error>(())
    }
    .boxed()
  }
}

fn characteristic_properties(flags: CharPropFlags) -> CharacteristicProperties {
  CharacteristicProperties {
    broadcast: flags.contains(CharPropFlags::BROADCAST),
    read: flags.contains(CharPropFlags::READ),
    write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
    write: flags.contains(CharPropFlags::WRITE),
    notify: flags.contains(CharPropFlags::NOTIFY),
    indicate: flags.contains(CharPropFlags::INDICATE),
    authenticated_signed_writes: flags.contains(CharPropFlags::AUTHENTICATED_SIGNED_WRITES),
  }
}

fn advertisement_from(device_id: String, rssi: i16, properties: PeripheralProperties) -> Advertisement {
  Advertisement {
    device: DeviceInfo {
      id: device_id,
      name: properties.local_name,
    },
    rssi,
    tx_power: properties.tx_power_level,
    services: properties.services,
    manufacturer_data: properties.manufacturer_data.into_iter().collect(),
    service_data: properties.service_data.into_iter().collect(),
  }
}

fn peripheral_key(peripheral: &Peripheral) -> String {
  peripheral.address().to_string()
}
