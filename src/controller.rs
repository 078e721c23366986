//! Discovery to connection to write workflow.
//!
//! [`BleWorkflow`] owns one [`Session`] and drives the host binding through
//! scan, connect, battery read, write-target lookup and writes. Every outcome
//! is reported to the [`WorkflowSink`]; errors are also returned to the caller.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use tauri::async_runtime::{self, JoinHandle, RuntimeHandle, TokioHandle};
use tokio::time::{interval_at, timeout_at, Instant};
use uuid::Uuid;

use crate::{
  filter::NormalizedScanOptions,
  format::AdvertisementSummary,
  gatt::{parse_uuid, BATTERY_LEVEL, BATTERY_SERVICE, DEVICE_INFORMATION},
  host::{AdvertisementStream, BluetoothHost, GattCharacteristic, GattSession},
  models::*,
  session::{Claim, Session},
  sink::{ScanStopReason, WorkflowEvent, WorkflowSink},
  Error, Result,
};

/// [`Config`] with UUIDs resolved and durations typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
  pub battery_service: Uuid,
  pub write_service: Uuid,
  pub scan_timeout: Duration,
  pub rssi_poll_interval: Option<Duration>,
}

impl Default for WorkflowConfig {
  fn default() -> Self {
    Self {
      battery_service: BATTERY_SERVICE,
      write_service: DEVICE_INFORMATION,
      scan_timeout: Duration::from_secs(30),
      rssi_poll_interval: Some(Duration::from_secs(30)),
    }
  }
}

impl TryFrom<&Config> for WorkflowConfig {
  type Error = Error;

  fn try_from(config: &Config) -> Result<Self> {
    Ok(Self {
      battery_service: parse_uuid(&config.battery_service)?,
      write_service: parse_uuid(&config.write_service)?,
      scan_timeout: Duration::from_millis(config.scan_timeout_ms.max(1)),
      rssi_poll_interval: match config.rssi_poll_interval_ms {
        0 => None,
        millis => Some(Duration::from_millis(millis)),
      },
    })
  }
}

/// The workflow controller. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct BleWorkflow {
  inner: Arc<WorkflowInner>,
}

struct WorkflowInner {
  host: Arc<dyn BluetoothHost>,
  sink: Arc<dyn WorkflowSink>,
  config: WorkflowConfig,
  session: StdMutex<Session>,
  scan_task: StdMutex<Option<JoinHandle<()>>>,
}

impl BleWorkflow {
  pub fn new(
    host: Arc<dyn BluetoothHost>,
    sink: Arc<dyn WorkflowSink>,
    config: WorkflowConfig,
  ) -> Self {
    Self {
      inner: Arc::new(WorkflowInner {
        host,
        sink,
        config,
        session: StdMutex::new(Session::new()),
        scan_task: StdMutex::new(None),
      }),
    }
  }

  pub fn config(&self) -> &WorkflowConfig {
    &self.inner.config
  }

  pub fn state(&self) -> WorkflowState {
    self.session().state()
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    self.session().snapshot()
  }

  pub async fn is_available(&self) -> Result<bool> {
    self.inner.host.is_available().await
  }

  /// Starts a continuous advertisement scan. The first matching advertisement
  /// triggers exactly one connection attempt.
  pub async fn start_scan(&self, options: ScanOptions) -> Result<()> {
    let result = self.try_start_scan(options).await;
    self.report_err(&result);
    result
  }

  async fn try_start_scan(&self, options: ScanOptions) -> Result<()> {
    let options = Arc::new(NormalizedScanOptions::try_from(options)?);
    if !self.inner.host.is_available().await? {
      return Err(Error::UnsupportedPlatform);
    }
    let scan_id = self.session().begin_scan(options.clone())?;
    let request = options.scan_request(&[
      self.inner.config.battery_service,
      self.inner.config.write_service,
    ]);
    let stream = match self.inner.host.start_scan(request).await {
      Ok(stream) => stream,
      Err(err) => {
        self.session().end_scan(scan_id);
        return Err(err);
      }
    };
    let scan_timeout = options.scan_timeout().unwrap_or(self.inner.config.scan_timeout);

    log::info!(
      "Scan started | scan_id={} | timeout_ms={}",
      scan_id,
      scan_timeout.as_millis()
    );
    self.report(WorkflowEvent::ScanStarted {
      timeout_ms: scan_timeout.as_millis() as u64,
    });
    self.report(WorkflowEvent::StateChanged {
      state: WorkflowState::Scanning,
    });

    let workflow = self.clone();
    let task = spawn(async move {
      workflow.run_scan(scan_id, stream, scan_timeout).await;
    });
    if let Some(previous) = self.scan_task().replace(task) {
      previous.abort();
    }
    Ok(())
  }

  async fn run_scan(&self, scan_id: u64, mut stream: AdvertisementStream, scan_timeout: Duration) {
    let deadline = Instant::now() + scan_timeout;
    loop {
      match timeout_at(deadline, stream.next()).await {
        Ok(Some(advertisement)) => {
          self.handle_advertisement(advertisement);
          let active = self.session().active_scan();
          if active != Some(scan_id) {
            break;
          }
        }
        Ok(None) => {
          let ended = self.session().end_scan(scan_id);
          if ended {
            self.scan_finished(ScanStopReason::StreamEnded);
          }
          break;
        }
        Err(_) => {
          // Host scan stops before the session is released.
          let active = self.session().active_scan();
          if active == Some(scan_id) {
            log::info!("Scan timed out | scan_id={scan_id}");
            self.stop_host_scan().await;
            let ended = self.session().end_scan(scan_id);
            if ended {
              self.scan_finished(ScanStopReason::Timeout);
            }
          }
          break;
        }
      }
    }
  }

  /// Stops an active scan. No-op when nothing is being scanned.
  pub async fn stop_scan(&self) -> Result<()> {
    let active = self.session().active_scan();
    let Some(scan_id) = active else {
      return Ok(());
    };
    self.abort_scan_task();
    let result = self.inner.host.stop_scan().await;
    let ended = self.session().end_scan(scan_id);
    if !ended {
      return Ok(());
    }
    self.report_err(&result);
    self.scan_finished(ScanStopReason::Cancelled);
    result
  }

  /// Reports one advertisement and, while scanning, offers it to the selection
  /// rule. Returns `true` if this advertisement launched a connection attempt.
  pub fn handle_advertisement(&self, advertisement: Advertisement) -> bool {
    self.report(WorkflowEvent::Advertisement(AdvertisementSummary::from(
      &advertisement,
    )));
    let claim = self.session().claim_from_scan(&advertisement);
    match claim {
      Claim::Claimed { attempt, scan_id } => {
        log::info!(
          "Device selected | scan_id={} | device_id={} | name={:?}",
          scan_id,
          advertisement.device.id,
          advertisement.device.name
        );
        let workflow = self.clone();
        spawn(async move {
          workflow.abort_scan_task();
          workflow.stop_host_scan().await;
          workflow.report(WorkflowEvent::ScanStopped {
            reason: ScanStopReason::DeviceSelected,
          });
          let _ = workflow.establish(attempt, advertisement.device).await;
        });
        true
      }
      Claim::Filtered => {
        log::debug!(
          "Advertisement filtered | device_id={}",
          advertisement.device.id
        );
        false
      }
      Claim::Ignored => {
        log::debug!(
          "Advertisement ignored, no scan active | device_id={}",
          advertisement.device.id
        );
        false
      }
    }
  }

  /// Connects to a caller-chosen device, interrupting a scan if one is active.
  pub async fn connect(&self, device: DeviceInfo) -> Result<SessionSnapshot> {
    let claimed = self.session().claim(&device);
    let (attempt, interrupted) = match claimed {
      Ok(claimed) => claimed,
      Err(err) => {
        self.report(WorkflowEvent::failure(&err));
        return Err(err);
      }
    };
    if interrupted.is_some() {
      self.abort_scan_task();
      self.stop_host_scan().await;
      self.report(WorkflowEvent::ScanStopped {
        reason: ScanStopReason::DeviceSelected,
      });
    }
    self.establish(attempt, device).await?;
    Ok(self.snapshot())
  }

  async fn establish(&self, attempt: u64, device: DeviceInfo) -> Result<()> {
    self.report(WorkflowEvent::Connecting {
      device: device.clone(),
    });
    self.report(WorkflowEvent::StateChanged {
      state: WorkflowState::Connecting,
    });

    let gatt = match self.inner.host.connect(&device.id).await {
      Ok(gatt) => gatt,
      Err(err) => {
        let err = Error::Connection {
          device_id: device.id.clone(),
          reason: err.to_string(),
        };
        log::warn!("Connection failed | device_id={} | err={}", device.id, err);
        let aborted = self.session().abort(attempt);
        if aborted {
          self.report(WorkflowEvent::StateChanged {
            state: WorkflowState::Idle,
          });
        }
        self.report(WorkflowEvent::failure(&err));
        return Err(err);
      }
    };

    let observer = Arc::downgrade(&self.inner);
    gatt.on_disconnected(Box::new(move |device_id: &str| {
      if let Some(inner) = Weak::upgrade(&observer) {
        BleWorkflow { inner }.on_disconnected(device_id);
      }
    }));

    match self.read_battery_level(gatt.as_ref()).await {
      Ok(level) => self.report(WorkflowEvent::BatteryLevel {
        device_id: device.id.clone(),
        level,
      }),
      Err(err) => {
        log::warn!("Battery read skipped | device_id={} | err={}", device.id, err);
        self.report(WorkflowEvent::failure(&err));
      }
    }
    self.report(WorkflowEvent::DeviceIdentified {
      device: device.clone(),
    });

    let write_target = match self.find_write_target(gatt.as_ref()).await {
      Ok(target) => Some(target),
      Err(err) => {
        log::warn!("No write target | device_id={} | err={}", device.id, err);
        self.report(WorkflowEvent::failure(&err));
        None
      }
    };
    let write_characteristic = write_target.as_ref().map(|target| target.uuid());
    let rssi_task = self.spawn_rssi_poller(&gatt);

    let committed = self.session().commit(attempt, gatt, write_target, rssi_task);
    if !committed {
      let err = Error::Connection {
        device_id: device.id.clone(),
        reason: "device disconnected during setup".into(),
      };
      log::warn!("Commit refused | device_id={}", device.id);
      self.report(WorkflowEvent::failure(&err));
      return Err(err);
    }

    log::info!(
      "Connected | device_id={} | write_characteristic={:?}",
      device.id,
      write_characteristic
    );
    self.report(WorkflowEvent::Connected {
      device,
      write_characteristic,
    });
    self.report(WorkflowEvent::StateChanged {
      state: WorkflowState::Connected,
    });
    Ok(())
  }

  async fn read_battery_level(&self, gatt: &dyn GattSession) -> Result<u8> {
    let service = gatt.primary_service(self.inner.config.battery_service).await?;
    let characteristic = service.characteristic(BATTERY_LEVEL).await?;
    if !characteristic.properties().read {
      return Err(Error::CharacteristicNotReadable {
        device_id: gatt.device_id().to_string(),
        characteristic_uuid: BATTERY_LEVEL.to_string(),
      });
    }
    let value = characteristic.read().await?;
    value
      .first()
      .copied()
      .ok_or_else(|| Error::InvalidValue("battery level characteristic returned no data".into()))
  }

  async fn find_write_target(&self, gatt: &dyn GattSession) -> Result<Arc<dyn GattCharacteristic>> {
    let service_uuid = self.inner.config.write_service;
    let service = gatt.primary_service(service_uuid).await?;
    service
      .characteristics()
      .await?
      .into_iter()
      .find(|characteristic| characteristic.properties().is_writable())
      .ok_or_else(|| Error::NoWritableCharacteristic {
        device_id: gatt.device_id().to_string(),
        service_uuid: service_uuid.to_string(),
      })
  }

  fn spawn_rssi_poller(&self, gatt: &Arc<dyn GattSession>) -> Option<JoinHandle<()>> {
    let period = self.inner.config.rssi_poll_interval?;
    let gatt = gatt.clone();
    let sink = self.inner.sink.clone();
    Some(spawn(async move {
      let mut ticker = interval_at(Instant::now() + period, period);
      loop {
        ticker.tick().await;
        match gatt.read_rssi().await {
          Ok(Some(rssi)) => sink.report(WorkflowEvent::Rssi {
            device_id: gatt.device_id().to_string(),
            rssi,
          }),
          Ok(None) => {}
          Err(err) => log::warn!("RSSI read failed | device_id={} | err={}", gatt.device_id(), err),
        }
      }
    }))
  }

  /// Writes `payload` once to the selected write characteristic.
  pub async fn send(&self, payload: impl Into<Payload>) -> Result<()> {
    let result = self.try_send(payload.into()).await;
    self.report_err(&result);
    result
  }

  async fn try_send(&self, payload: Payload) -> Result<()> {
    let bytes = payload.into_bytes();
    if bytes.is_empty() {
      return Err(Error::InvalidRequest("Please enter a payload to send.".into()));
    }
    let (device, target) = self.session().write_target().ok_or(Error::NotReady)?;
    let with_response = target.properties().write;
    target.write(&bytes, with_response).await?;
    log::info!(
      "Payload written | device_id={} | characteristic={} | len={} | with_response={}",
      device.id,
      target.uuid(),
      bytes.len(),
      with_response
    );
    self.report(WorkflowEvent::sent(&device.id, &bytes));
    Ok(())
  }

  /// Host disconnect notification. Safe to call repeatedly.
  pub fn on_disconnected(&self, device_id: &str) {
    let cleared = self.session().clear(device_id);
    match cleared {
      Some(device) => {
        log::info!("Device disconnected | device_id={}", device.id);
        self.report(WorkflowEvent::Disconnected { device });
        self.report(WorkflowEvent::StateChanged {
          state: WorkflowState::Idle,
        });
      }
      None => log::debug!("Disconnect ignored, device not in session | device_id={device_id}"),
    }
  }

  /// Drops the current connection. No-op when not connected.
  pub async fn disconnect(&self) -> Result<()> {
    let gatt = self.session().connected_gatt();
    let Some(gatt) = gatt else {
      return Ok(());
    };
    let result = gatt.disconnect().await;
    self.on_disconnected(gatt.device_id());
    self.report_err(&result);
    result
  }

  async fn stop_host_scan(&self) {
    if let Err(err) = self.inner.host.stop_scan().await {
      log::warn!("Failed to stop scan | err={err}");
    }
  }

  fn scan_finished(&self, reason: ScanStopReason) {
    self.report(WorkflowEvent::ScanStopped { reason });
    self.report(WorkflowEvent::StateChanged {
      state: WorkflowState::Idle,
    });
  }

  fn abort_scan_task(&self) {
    if let Some(task) = self.scan_task().take() {
      task.abort();
    }
  }

  fn report(&self, event: WorkflowEvent) {
    self.inner.sink.report(event);
  }

  fn report_err<T>(&self, result: &Result<T>) {
    if let Err(err) = result {
      self.report(WorkflowEvent::failure(err));
    }
  }

  fn session(&self) -> MutexGuard<'_, Session> {
    self
      .inner
      .session
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn scan_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    self
      .inner
      .scan_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

/// Spawns on the tokio runtime the caller runs on, or on Tauri's shared runtime
/// when called from outside one.
fn spawn<F>(task: F) -> JoinHandle<()>
where
  F: Future<Output = ()> + Send + 'static,
{
  let runtime = match TokioHandle::try_current() {
    Ok(handle) => RuntimeHandle::Tokio(handle),
    Err(_) => async_runtime::handle(),
  };
  runtime.spawn(task)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_resolves_service_names() {
    let config = WorkflowConfig::try_from(&Config {
      write_service: "0xFFE0".into(),
      rssi_poll_interval_ms: 0,
      ..Config::default()
    })
    .unwrap();
    assert_eq!(config.battery_service, BATTERY_SERVICE);
    assert_eq!(config.write_service, parse_uuid("ffe0").unwrap());
    assert_eq!(config.scan_timeout, Duration::from_secs(30));
    assert_eq!(config.rssi_poll_interval, None);
  }

  #[test]
  fn default_config_matches_plugin_defaults() {
    assert_eq!(
      WorkflowConfig::try_from(&Config::default()).unwrap(),
      WorkflowConfig::default()
    );
  }
}
