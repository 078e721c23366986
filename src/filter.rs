use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

use crate::{
  gatt::parse_uuid,
  host::ScanRequest,
  models::{Advertisement, ScanOptions},
  Error, Result,
};

/// [`ScanOptions`] with UUIDs parsed and the selection rule validated.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedScanOptions {
  accept_all_devices: bool,
  filters: Vec<NormalizedDeviceFilter>,
  optional_services: Vec<Uuid>,
  scan_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
struct NormalizedDeviceFilter {
  services: Vec<Uuid>,
  name: Option<String>,
  name_prefix: Option<String>,
}

impl TryFrom<ScanOptions> for NormalizedScanOptions {
  type Error = Error;

  fn try_from(options: ScanOptions) -> Result<Self> {
    if !options.accept_all_devices && options.filters.is_empty() {
      return Err(Error::InvalidRequest(
        "Either acceptAllDevices must be true or filters must be provided".into(),
      ));
    }

    let filters = options
      .filters
      .into_iter()
      .map(|filter| {
        let services = filter
          .services
          .iter()
          .map(|value| parse_uuid(value))
          .collect::<Result<Vec<_>>>()?;
        Ok(NormalizedDeviceFilter {
          services,
          name: filter.name,
          name_prefix: filter.name_prefix,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let optional_services = options
      .optional_services
      .iter()
      .map(|value| parse_uuid(value))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      accept_all_devices: options.accept_all_devices,
      filters,
      optional_services,
      scan_timeout: options
        .scan_timeout_ms
        .map(|millis| Duration::from_millis(millis.max(1))),
    })
  }
}

impl NormalizedScanOptions {
  pub(crate) fn matches(&self, advertisement: &Advertisement) -> bool {
    if self.accept_all_devices {
      return true;
    }
    self.filters.iter().any(|filter| filter.matches(advertisement))
  }

  pub(crate) fn scan_timeout(&self) -> Option<Duration> {
    self.scan_timeout
  }

  /// Host request with the workflow's own services added to the pre-authorized list.
  pub(crate) fn scan_request(&self, required: &[Uuid]) -> ScanRequest {
    let mut optional_services = self.optional_services.clone();
    for uuid in required {
      if !optional_services.contains(uuid) {
        optional_services.push(*uuid);
      }
    }
    ScanRequest {
      accept_all_devices: self.accept_all_devices,
      optional_services,
    }
  }
}

impl NormalizedDeviceFilter {
  fn matches(&self, advertisement: &Advertisement) -> bool {
    let local_name = advertisement.device.name.as_deref();
    if let Some(name) = &self.name {
      if local_name != Some(name.as_str()) {
        return false;
      }
    }
    if let Some(prefix) = &self.name_prefix {
      if !local_name
        .map(|value| value.starts_with(prefix.as_str()))
        .unwrap_or(false)
      {
        return false;
      }
    }
    if !self.services.is_empty() {
      let present: HashSet<&Uuid> = advertisement.services.iter().collect();
      if !self.services.iter().all(|uuid| present.contains(uuid)) {
        return false;
      }
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gatt::{BATTERY_SERVICE, DEVICE_INFORMATION};
  use crate::models::{DeviceFilter, DeviceInfo};

  fn advertisement(name: Option<&str>) -> Advertisement {
    Advertisement::new(DeviceInfo::new("id", name), -50)
  }

  #[test]
  fn requires_accept_all_or_filters() {
    assert!(matches!(
      NormalizedScanOptions::try_from(ScanOptions::default()),
      Err(Error::InvalidRequest(_))
    ));
  }

  #[test]
  fn accept_all_matches_unnamed_devices() {
    let options = NormalizedScanOptions::try_from(ScanOptions::accept_all()).unwrap();
    assert!(options.matches(&advertisement(None)));
  }

  #[test]
  fn name_prefix_list_matches_any_prefix() {
    let options =
      NormalizedScanOptions::try_from(ScanOptions::name_prefixes(["Nordic", "ESP"])).unwrap();
    assert!(options.matches(&advertisement(Some("ESP32-C3"))));
    assert!(options.matches(&advertisement(Some("Nordic_UART"))));
    assert!(!options.matches(&advertisement(Some("Phone"))));
    assert!(!options.matches(&advertisement(None)));
  }

  #[test]
  fn service_filter_requires_all_listed_services() {
    let options = NormalizedScanOptions::try_from(ScanOptions {
      filters: vec![DeviceFilter {
        services: vec!["battery_service".into(), "180a".into()],
        ..DeviceFilter::default()
      }],
      ..ScanOptions::default()
    })
    .unwrap();

    let mut partial = advertisement(None);
    partial.services.push(BATTERY_SERVICE);
    assert!(!options.matches(&partial));

    partial.services.push(DEVICE_INFORMATION);
    assert!(options.matches(&partial));
  }

  #[test]
  fn scan_request_adds_workflow_services_once() {
    let options = NormalizedScanOptions::try_from(ScanOptions {
      optional_services: vec!["battery_service".into()],
      ..ScanOptions::accept_all()
    })
    .unwrap();
    let request = options.scan_request(&[BATTERY_SERVICE, DEVICE_INFORMATION]);
    assert!(request.accept_all_devices);
    assert_eq!(request.optional_services, vec![BATTERY_SERVICE, DEVICE_INFORMATION]);
  }
}
