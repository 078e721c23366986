use tauri::{
  plugin::{Builder, TauriPlugin},
  Manager, Runtime,
};

pub use models::*;

#[cfg(desktop)]
mod desktop;
#[cfg(mobile)]
mod mobile;

mod commands;
mod error;
mod filter;
mod models;
mod session;

pub mod controller;
pub mod format;
pub mod gatt;
pub mod host;
pub mod mock;
pub mod sink;

pub use controller::{BleWorkflow, WorkflowConfig};
pub use error::{Error, Result};
pub use sink::{LogSink, ScanStopReason, WorkflowEvent, WorkflowSink};

#[cfg(desktop)]
pub use desktop::{BtleplugHost, Workflow};
#[cfg(mobile)]
pub use mobile::Workflow;

/// Extensions to [`tauri::App`], [`tauri::AppHandle`] and [`tauri::Window`] to access the BLE workflow.
pub trait BleWorkflowExt<R: Runtime> {
  fn ble_workflow(&self) -> &Workflow<R>;
}

impl<R: Runtime, T: Manager<R>> crate::BleWorkflowExt<R> for T {
  fn ble_workflow(&self) -> &Workflow<R> {
    self.state::<Workflow<R>>().inner()
  }
}

/// Initializes the plugin. Reads `plugins.ble-workflow` from the app config; every field is optional.
pub fn init<R: Runtime>() -> TauriPlugin<R, Option<Config>> {
  Builder::<R, Option<Config>>::new("ble-workflow")
    .invoke_handler(commands::handlers())
    .setup(|app, api| {
      #[cfg(mobile)]
      let workflow = mobile::init(app, api)?;
      #[cfg(desktop)]
      let workflow = {
        let config = api.config().clone().unwrap_or_default();
        desktop::init(app, api, &config)?
      };
      app.manage(workflow);
      Ok(())
    })
    .build()
}
