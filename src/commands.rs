use tauri::{command, AppHandle, Runtime};

use crate::models::*;
use crate::{BleWorkflowExt, Result};

#[command]
pub(crate) async fn get_availability<R: Runtime>(app: AppHandle<R>) -> Result<bool> {
    app.ble_workflow().get_availability().await
}

#[command]
pub(crate) async fn start_scan<R: Runtime>(app: AppHandle<R>, options: ScanOptions) -> Result<()> {
    app.ble_workflow().start_scan(options).await
}

#[command]
pub(crate) async fn stop_scan<R: Runtime>(app: AppHandle<R>) -> Result<()> {
    app.ble_workflow().stop_scan().await
}

#[command]
pub(crate) async fn send<R: Runtime>(app: AppHandle<R>, request: SendRequest) -> Result<()> {
    app.ble_workflow().send(request).await
}

#[command]
pub(crate) async fn disconnect<R: Runtime>(app: AppHandle<R>) -> Result<()> {
    app.ble_workflow().disconnect().await
}

#[command]
pub(crate) async fn get_session<R: Runtime>(app: AppHandle<R>) -> Result<SessionSnapshot> {
    app.ble_workflow().session()
}

pub(crate) fn handlers<R: Runtime>() -> impl Fn(tauri::ipc::Invoke<R>) -> bool {
    tauri::generate_handler![
        get_availability,
        start_scan,
        stop_scan,
        send,
        disconnect,
        get_session
    ]
}
