const COMMANDS: &[&str] = &[
  "get_availability",
  "start_scan",
  "stop_scan",
  "send",
  "disconnect",
  "get_session",
];

fn main() {
  tauri_plugin::Builder::new(COMMANDS).build();
}
