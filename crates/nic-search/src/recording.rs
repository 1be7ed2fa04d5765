/// Voice query recording.
///
/// One session exists server-wide. Real capture shells out to ALSA's `arecord`
/// (16 kHz mono PCM16 WAV); hosts without a capture device, or environments where audio is
/// disabled, fall back to a simulated recorder that produces a test tone and a fixed
/// transcript.
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use nic_common::transcribe::TranscriptionClient;

use crate::error::AppError;
use crate::language::Language;
use crate::wav;

const TARGET_PEAK: f32 = 0.7;
const SIMULATED_SECONDS: f32 = 3.0;
const SIMULATED_FREQUENCY_HZ: f32 = 440.0;
const SIMULATED_AMPLITUDE: f32 = 0.5;

pub const NO_SESSION: &str = "No active recording session";
pub const NO_AUDIO: &str = "No audio data recorded";
pub const SPEECH_UNCLEAR: &str = "Speech unclear";
pub const NOT_CONFIGURED: &str = "Transcription service not configured";

/// A capture device as reported by `arecord -l`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDevice {
    pub id: usize,
    pub name: String,
    pub inputs: u32,
    pub outputs: u32,
    pub default_input: bool,
    pub default_output: bool,
}

/// Parse `arecord -l` output. The first capture device is treated as the default input.
pub fn parse_capture_devices(listing: &str) -> Vec<AudioDevice> {
    let card_re = Regex::new(
        r"^card (\d+): (\S+) \[([^\]]*)\], device (\d+): ([^\[]*)\[([^\]]*)\]",
    )
    .expect("valid regex");

    listing
        .lines()
        .filter_map(|line| card_re.captures(line))
        .enumerate()
        .map(|(id, caps)| AudioDevice {
            id,
            name: format!("{}: {} (hw:{},{})", &caps[3], &caps[6], &caps[1], &caps[4]),
            inputs: 1,
            outputs: 0,
            default_input: id == 0,
            default_output: false,
        })
        .collect()
}

/// Enumerate capture devices by running `{command} -l`. Any failure yields no devices.
pub async fn list_capture_devices(command: &str) -> Vec<AudioDevice> {
    let output = match Command::new(command)
        .arg("-l")
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, command, "failed to list capture devices");
            return Vec::new();
        }
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(command, stderr = %stderr.trim(), "capture device listing failed");
        return Vec::new();
    }
    parse_capture_devices(&String::from_utf8_lossy(&output.stdout))
}

/// Response body of `/api/stop_recording`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingReport {
    pub status: &'static str,
    pub message: String,
    pub transcript: String,
}

impl RecordingReport {
    fn from_transcript(transcript: String) -> Self {
        if is_failure_marker(&transcript) {
            Self {
                status: "error",
                message: "Failed to transcribe audio".to_string(),
                transcript,
            }
        } else {
            Self {
                status: "success",
                message: "Recording stopped".to_string(),
                transcript,
            }
        }
    }
}

/// Transcripts that report a failure instead of recognised speech.
pub fn is_failure_marker(transcript: &str) -> bool {
    [NO_SESSION, NO_AUDIO, SPEECH_UNCLEAR, NOT_CONFIGURED].contains(&transcript)
        || transcript.starts_with("Error:")
}

enum Capture {
    Process(Child),
    Simulated,
}

/// Outcome of stopping a capture: either a final transcript or audio still to transcribe.
enum Captured {
    Done(String),
    Audio(Vec<u8>),
}

enum Session {
    Idle,
    Recording {
        capture: Capture,
        language: Language,
        started: Instant,
    },
}

pub struct RecordingService {
    recorder_command: String,
    recording_path: PathBuf,
    force_simulation: bool,
    transcriber: Option<TranscriptionClient>,
    session: Mutex<Session>,
}

impl RecordingService {
    pub fn new(
        recorder_command: String,
        recording_path: PathBuf,
        force_simulation: bool,
        transcriber: Option<TranscriptionClient>,
    ) -> Self {
        Self {
            recorder_command,
            recording_path,
            force_simulation,
            transcriber,
            session: Mutex::new(Session::Idle),
        }
    }

    pub fn recorder_command(&self) -> &str {
        &self.recorder_command
    }

    pub fn force_simulation(&self) -> bool {
        self.force_simulation
    }

    pub async fn is_recording(&self) -> bool {
        matches!(*self.session.lock().await, Session::Recording { .. })
    }

    /// Start a session. Returns the status message; starting twice is not an error.
    pub async fn start(&self, language: Language) -> Result<&'static str, AppError> {
        let mut session = self.session.lock().await;
        if matches!(*session, Session::Recording { .. }) {
            return Ok("Recording already in progress");
        }

        let simulate = self.force_simulation
            || list_capture_devices(&self.recorder_command).await.is_empty();

        let (capture, message) = if simulate {
            (Capture::Simulated, "Recording started (simulation mode)")
        } else {
            (Capture::Process(self.spawn_recorder().await?), "Recording started")
        };

        info!(language = %language, simulated = simulate, "recording started");
        *session = Session::Recording {
            capture,
            language,
            started: Instant::now(),
        };
        Ok(message)
    }

    async fn spawn_recorder(&self) -> Result<Child, AppError> {
        let parent = self.recording_path.parent();
        if let Some(parent) = parent.filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        // A recorder that dies early must not leave the previous session's audio behind.
        match tokio::fs::remove_file(&self.recording_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Command::new(&self.recorder_command)
            .args(["-q", "-f", "S16_LE", "-c", "1", "-t", "wav"])
            .arg("-r")
            .arg(wav::SAMPLE_RATE.to_string())
            .arg(&self.recording_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Recording(format!("failed to start {}: {e}", self.recorder_command))
            })
    }

    /// Stop the session and transcribe what was captured.
    ///
    /// The session lock covers stopping the recorder and preparing the audio, not the
    /// upload, so status checks and new sessions are not blocked by a slow transcription.
    pub async fn stop(&self) -> RecordingReport {
        let (captured, language, started) = {
            let mut session = self.session.lock().await;
            let Session::Recording {
                capture,
                language,
                started,
            } = std::mem::replace(&mut *session, Session::Idle)
            else {
                return RecordingReport::from_transcript(NO_SESSION.to_string());
            };
            let captured = match capture {
                Capture::Simulated => self.finish_simulated(language).await,
                Capture::Process(child) => self.finish_capture(child).await,
            };
            (captured, language, started)
        };

        let transcript = match captured {
            Captured::Done(transcript) => transcript,
            Captured::Audio(audio) => self.transcribe(audio, language).await,
        };
        info!(
            language = %language,
            seconds = started.elapsed().as_secs_f64(),
            transcript = %transcript,
            "recording stopped"
        );
        RecordingReport::from_transcript(transcript)
    }

    async fn finish_simulated(&self, language: Language) -> Captured {
        let tone = wav::sine_wave(SIMULATED_SECONDS, SIMULATED_FREQUENCY_HZ, SIMULATED_AMPLITUDE);
        if let Err(e) = self.write_recording(&tone).await {
            return Captured::Done(format!("Error: {e}"));
        }
        Captured::Done(language.simulated_transcript().to_string())
    }

    /// Stop the recorder and load its normalised audio.
    async fn finish_capture(&self, mut child: Child) -> Captured {
        match child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                warn!(%status, "recorder exited early");
                return Captured::Done(NO_AUDIO.to_string());
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to stop recorder");
                }
            }
            Err(e) => warn!(error = %e, "failed to poll recorder"),
        }
        if let Err(e) = child.wait().await {
            warn!(error = %e, "failed to reap recorder");
        }

        let mut audio = match tokio::fs::read(&self.recording_path).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, path = %self.recording_path.display(), "no recording written");
                return Captured::Done(NO_AUDIO.to_string());
            }
        };
        let layout = match wav::repair_header(&mut audio) {
            Ok(layout) if layout.data_len > 0 => layout,
            Ok(_) => return Captured::Done(NO_AUDIO.to_string()),
            Err(e) => return Captured::Done(format!("Error: {e}")),
        };
        info!(
            bytes = layout.data_len,
            peak = wav::peak_level(&audio, &layout),
            "captured audio"
        );
        match wav::normalize_peak(&mut audio, &layout, TARGET_PEAK) {
            Ok(true) => {}
            Ok(false) => return Captured::Done(SPEECH_UNCLEAR.to_string()),
            Err(e) => return Captured::Done(format!("Error: {e}")),
        }
        if let Err(e) = self.write_recording(&audio).await {
            warn!(error = %e, "failed to store normalised recording");
        }
        Captured::Audio(audio)
    }

    async fn transcribe(&self, audio: Vec<u8>, language: Language) -> String {
        let Some(client) = &self.transcriber else {
            return NOT_CONFIGURED.to_string();
        };
        match client.transcribe_wav(audio, language.iso_code()).await {
            Ok(text) if text.is_empty() => SPEECH_UNCLEAR.to_string(),
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "transcription failed");
                format!("Error: {e}")
            }
        }
    }

    async fn write_recording(&self, bytes: &[u8]) -> Result<(), AppError> {
        let parent = self.recording_path.parent();
        if let Some(parent) = parent.filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.recording_path, bytes).await?;
        Ok(())
    }
}
