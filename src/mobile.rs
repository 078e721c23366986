use serde::de::DeserializeOwned;
use tauri::{
  plugin::{PluginApi, PluginHandle},
  AppHandle, Runtime,
};

use crate::{models::*, Error, Result};

#[cfg(target_os = "ios")]
tauri::ios_plugin_binding!(init_plugin_ble_workflow);

// initializes the Kotlin or Swift plugin classes
pub fn init<R: Runtime, C: DeserializeOwned>(
  _app: &AppHandle<R>,
  api: PluginApi<R, C>,
) -> Result<Workflow<R>> {
  #[cfg(target_os = "android")]
  let handle = api.register_android_plugin("", "BleWorkflowPlugin")?;
  #[cfg(target_os = "ios")]
  let handle = api.register_ios_plugin(init_plugin_ble_workflow)?;
  Ok(Workflow(handle))
}

/// Access to the BLE workflow. No mobile host binding exists yet.
pub struct Workflow<R: Runtime>(PluginHandle<R>);

impl<R: Runtime> Workflow<R> {
  pub async fn get_availability(&self) -> Result<bool> {
    Ok(false)
  }

  pub async fn start_scan(&self, _options: ScanOptions) -> Result<()> {
    Err(Error::UnsupportedPlatform)
  }

  pub async fn stop_scan(&self) -> Result<()> {
    Ok(())
  }

  pub async fn send(&self, _request: SendRequest) -> Result<()> {
    Err(Error::NotReady)
  }

  pub async fn disconnect(&self) -> Result<()> {
    Ok(())
  }

  pub fn session(&self) -> Result<SessionSnapshot> {
    Ok(SessionSnapshot {
      state: WorkflowState::Idle,
      device: None,
      write_characteristic: None,
      scanning: false,
    })
  }
}
