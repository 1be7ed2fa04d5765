use serde::Serialize;

use crate::recording::{list_capture_devices, AudioDevice, RecordingService};

/// Host and audio diagnostics shown in the client's admin panel.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: &'static str,
    pub os_version: String,
    pub runtime_version: String,
    pub server_env: String,
    pub simulation_mode: bool,
    pub can_record: bool,
    pub recording_active: bool,
    pub devices: Vec<AudioDevice>,
}

pub async fn collect(recording: &RecordingService, server_env: &str) -> SystemInfo {
    let devices = list_capture_devices(recording.recorder_command()).await;
    let has_input = devices.iter().any(|d| d.inputs > 0);
    SystemInfo {
        os: std::env::consts::OS,
        os_version: os_version().await,
        runtime_version: format!("nic-search {}", env!("CARGO_PKG_VERSION")),
        server_env: server_env.to_string(),
        simulation_mode: recording.force_simulation() || !has_input,
        can_record: has_input && !recording.force_simulation(),
        recording_active: recording.is_recording().await,
        devices,
    }
}

async fn os_version() -> String {
    match tokio::fs::read_to_string("/proc/sys/kernel/osrelease").await {
        Ok(release) => release.trim().to_string(),
        Err(_) => "unknown".to_string(),
    }
}
