//! The single owned workflow session.
//!
//! A write target only exists inside [`Phase::Connected`], so it can never
//! outlive the connected device. Every transition is a compare-and-set on the
//! phase plus an id, which lets the controller discard stale work (a scan task
//! whose scan was cancelled, a connect whose device already dropped).

use std::sync::Arc;

use tauri::async_runtime::JoinHandle;
use uuid::Uuid;

use crate::{
  filter::NormalizedScanOptions,
  host::{GattCharacteristic, GattSession},
  models::{Advertisement, DeviceInfo, SessionSnapshot, WorkflowState},
  Error, Result,
};

pub(crate) struct Session {
  phase: Phase,
  next_id: u64,
}

enum Phase {
  Idle,
  Scanning {
    scan_id: u64,
    options: Arc<NormalizedScanOptions>,
  },
  Connecting {
    attempt: u64,
    device: DeviceInfo,
  },
  Connected(Link),
}

struct Link {
  device: DeviceInfo,
  gatt: Arc<dyn GattSession>,
  write_target: Option<Arc<dyn GattCharacteristic>>,
  rssi_task: Option<JoinHandle<()>>,
}

impl Drop for Link {
  fn drop(&mut self) {
    if let Some(task) = self.rssi_task.take() {
      task.abort();
    }
  }
}

/// Outcome of offering an advertisement to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
  /// Session moved to `Connecting`; the caller owns the attempt.
  Claimed { attempt: u64, scan_id: u64 },
  /// A scan is active but the device does not satisfy its filter.
  Filtered,
  /// No scan is active (already connecting, connected or idle).
  Ignored,
}

impl Session {
  pub(crate) fn new() -> Self {
    Self {
      phase: Phase::Idle,
      next_id: 1,
    }
  }

  fn next_id(&mut self) -> u64 {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  pub(crate) fn state(&self) -> WorkflowState {
    match self.phase {
      Phase::Idle => WorkflowState::Idle,
      Phase::Scanning { .. } => WorkflowState::Scanning,
      Phase::Connecting { .. } => WorkflowState::Connecting,
      Phase::Connected(_) => WorkflowState::Connected,
    }
  }

  pub(crate) fn begin_scan(&mut self, options: Arc<NormalizedScanOptions>) -> Result<u64> {
    match self.phase {
      Phase::Idle => {
        let scan_id = self.next_id();
        self.phase = Phase::Scanning { scan_id, options };
        Ok(scan_id)
      }
      Phase::Scanning { .. } => Err(Error::AlreadyScanning),
      Phase::Connecting { .. } | Phase::Connected(_) => Err(Error::SessionBusy),
    }
  }

  /// Ends the given scan. Returns `false` if that scan is no longer the active one.
  pub(crate) fn end_scan(&mut self, scan_id: u64) -> bool {
    match self.phase {
      Phase::Scanning { scan_id: active, .. } if active == scan_id => {
        self.phase = Phase::Idle;
        true
      }
      _ => false,
    }
  }

  pub(crate) fn active_scan(&self) -> Option<u64> {
    match self.phase {
      Phase::Scanning { scan_id, .. } => Some(scan_id),
      _ => None,
    }
  }

  pub(crate) fn claim_from_scan(&mut self, advertisement: &Advertisement) -> Claim {
    let scan_id = match &self.phase {
      Phase::Scanning { scan_id, options } => {
        if !options.matches(advertisement) {
          return Claim::Filtered;
        }
        *scan_id
      }
      _ => return Claim::Ignored,
    };
    let attempt = self.next_id();
    self.phase = Phase::Connecting {
      attempt,
      device: advertisement.device.clone(),
    };
    Claim::Claimed { attempt, scan_id }
  }

  /// Direct claim for a caller-chosen device. Returns the attempt and the scan it interrupted, if any.
  pub(crate) fn claim(&mut self, device: &DeviceInfo) -> Result<(u64, Option<u64>)> {
    let interrupted = match self.phase {
      Phase::Idle => None,
      Phase::Scanning { scan_id, .. } => Some(scan_id),
      Phase::Connecting { .. } | Phase::Connected(_) => return Err(Error::SessionBusy),
    };
    let attempt = self.next_id();
    self.phase = Phase::Connecting {
      attempt,
      device: device.clone(),
    };
    Ok((attempt, interrupted))
  }

  pub(crate) fn is_attempt_live(&self, attempt: u64) -> bool {
    matches!(self.phase, Phase::Connecting { attempt: live, .. } if live == attempt)
  }

  /// Drops a failed attempt back to `Idle`.
  pub(crate) fn abort(&mut self, attempt: u64) -> bool {
    if self.is_attempt_live(attempt) {
      self.phase = Phase::Idle;
      true
    } else {
      false
    }
  }

  /// The only transition into `Connected`. Refused when the attempt is stale.
  pub(crate) fn commit(
    &mut self,
    attempt: u64,
    gatt: Arc<dyn GattSession>,
    write_target: Option<Arc<dyn GattCharacteristic>>,
    rssi_task: Option<JoinHandle<()>>,
  ) -> bool {
    let device = match &self.phase {
      Phase::Connecting {
        attempt: live,
        device,
      } if *live == attempt => device.clone(),
      _ => {
        if let Some(task) = rssi_task {
          task.abort();
        }
        return false;
      }
    };
    self.phase = Phase::Connected(Link {
      device,
      gatt,
      write_target,
      rssi_task,
    });
    true
  }

  /// Resets to `Idle` if `device_id` is the device being connected or connected.
  /// Returns the device that was dropped; `None` makes repeated calls no-ops.
  pub(crate) fn clear(&mut self, device_id: &str) -> Option<DeviceInfo> {
    let matches = match &self.phase {
      Phase::Connecting { device, .. } => device.id == device_id,
      Phase::Connected(link) => link.device.id == device_id,
      _ => false,
    };
    if !matches {
      return None;
    }
    match std::mem::replace(&mut self.phase, Phase::Idle) {
      Phase::Connecting { device, .. } => Some(device),
      Phase::Connected(link) => Some(link.device.clone()),
      _ => None,
    }
  }

  pub(crate) fn connected_device(&self) -> Option<&DeviceInfo> {
    match &self.phase {
      Phase::Connected(link) => Some(&link.device),
      _ => None,
    }
  }

  pub(crate) fn connected_gatt(&self) -> Option<Arc<dyn GattSession>> {
    match &self.phase {
      Phase::Connected(link) => Some(link.gatt.clone()),
      _ => None,
    }
  }

  pub(crate) fn write_target(&self) -> Option<(DeviceInfo, Arc<dyn GattCharacteristic>)> {
    match &self.phase {
      Phase::Connected(Link {
        device,
        write_target: Some(target),
        ..
      }) => Some((device.clone(), target.clone())),
      _ => None,
    }
  }

  fn write_characteristic(&self) -> Option<Uuid> {
    self.write_target().map(|(_, target)| target.uuid())
  }

  pub(crate) fn snapshot(&self) -> SessionSnapshot {
    SessionSnapshot {
      state: self.state(),
      device: self.connected_device().cloned(),
      write_characteristic: self.write_characteristic(),
      scanning: self.active_scan().is_some(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mock::{MockCharacteristic, MockGatt};
  use crate::models::{CharacteristicProperties, ScanOptions};

  fn accept_all() -> Arc<NormalizedScanOptions> {
    Arc::new(NormalizedScanOptions::try_from(ScanOptions::accept_all()).unwrap())
  }

  fn advertisement(id: &str) -> Advertisement {
    Advertisement::new(DeviceInfo::new(id, Some(id)), -40)
  }

  fn writable() -> Arc<dyn GattCharacteristic> {
    Arc::new(MockCharacteristic::new(
      crate::gatt::MODEL_NUMBER_STRING,
      CharacteristicProperties {
        write: true,
        ..CharacteristicProperties::default()
      },
    ))
  }

  #[test]
  fn scan_guard_rejects_second_scan() {
    let mut session = Session::new();
    session.begin_scan(accept_all()).unwrap();
    assert!(matches!(
      session.begin_scan(accept_all()),
      Err(Error::AlreadyScanning)
    ));
  }

  #[test]
  fn only_first_advertisement_claims() {
    let mut session = Session::new();
    session.begin_scan(accept_all()).unwrap();
    assert!(matches!(
      session.claim_from_scan(&advertisement("x")),
      Claim::Claimed { .. }
    ));
    assert_eq!(session.claim_from_scan(&advertisement("y")), Claim::Ignored);
    assert_eq!(session.state(), WorkflowState::Connecting);
  }

  #[test]
  fn clear_drops_write_target_with_device_and_is_idempotent() {
    let mut session = Session::new();
    let (attempt, _) = session.claim(&DeviceInfo::new("d", None)).unwrap();
    assert!(session.commit(attempt, Arc::new(MockGatt::detached("d")), Some(writable()), None));
    assert!(session.write_target().is_some());

    assert!(session.clear("d").is_some());
    let once = session.snapshot();
    assert!(session.clear("d").is_none());
    assert_eq!(session.snapshot(), once);
    assert_eq!(once.state, WorkflowState::Idle);
    assert!(once.device.is_none());
    assert!(once.write_characteristic.is_none());
  }

  #[test]
  fn stale_commit_is_refused() {
    let mut session = Session::new();
    let (attempt, _) = session.claim(&DeviceInfo::new("d", None)).unwrap();
    session.clear("d");
    assert!(!session.commit(attempt, Arc::new(MockGatt::detached("d")), Some(writable()), None));
    assert_eq!(session.state(), WorkflowState::Idle);
    assert!(session.write_target().is_none());
  }

  #[test]
  fn clear_ignores_other_devices() {
    let mut session = Session::new();
    let (attempt, _) = session.claim(&DeviceInfo::new("d", None)).unwrap();
    assert!(session.commit(attempt, Arc::new(MockGatt::detached("d")), None, None));
    assert!(session.clear("other").is_none());
    assert_eq!(session.state(), WorkflowState::Connected);
  }
}
