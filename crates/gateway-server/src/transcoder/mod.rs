//! Spawns, monitors, and terminates one transcoder child process per stream
//! (§4.5). The transcoder reads RTSP and produces two sinks: an RTP/UDP
//! feed for the SFU's PlainTransport and a rolling HLS segment archive.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use uuid::Uuid;

const GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Prefixes that classify a transcoder stderr line as fatal, mirroring the
/// kinds of RTSP/encoder failures an operator needs to distinguish (§4.5,
/// §7 persistent-camera taxonomy).
const FATAL_CONNECTION_REFUSED: &[&str] = &["Connection refused", "No route to host"];
const FATAL_NO_VIDEO: &[&str] = &["Stream map '0:v' matches no streams", "no video"];
const FATAL_CODEC_NEGOTIATION: &[&str] = &["could not find codec parameters", "Unsupported codec"];
const CONNECTED_MARKER: &str = "Input #0";

#[derive(Debug, Clone)]
pub enum TranscoderEvent {
    Connected,
    FatalError(TranscoderFailure),
    Exited { exit_code: Option<i32>, last_stderr_lines: Vec<String> },
}

#[derive(Debug, Clone)]
pub enum TranscoderFailure {
    ConnectionRefused(String),
    NoVideoTrack(String),
    CodecNegotiationFailed(String),
    Unknown(String),
}

pub struct TranscoderConfig {
    pub binary_path: PathBuf,
    pub rtsp_url: String,
    pub rtp_destination: (String, u16),
    pub recordings_root: PathBuf,
    pub stream_id: Uuid,
    pub segment_seconds: u32,
}

/// A handle to a running transcoder child. The child process itself is
/// owned by the background task that reads its stderr (so that task can
/// `wait()` on it and report a real exit code); this handle keeps only the
/// pid needed to signal it. Dropping the handle does not terminate the
/// process — call [`TranscoderHandle::stop`] explicitly (§4.5).
pub struct TranscoderHandle {
    pid: Option<u32>,
    pub events: mpsc::Receiver<TranscoderEvent>,
}

impl TranscoderHandle {
    pub fn spawn(cfg: TranscoderConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(cfg.recordings_root.join(cfg.stream_id.to_string()))?;

        let segment_pattern = cfg
            .recordings_root
            .join(cfg.stream_id.to_string())
            .join("segment-%s.ts");
        let playlist_path = cfg
            .recordings_root
            .join(cfg.stream_id.to_string())
            .join("playlist.m3u8");
        let (rtp_host, rtp_port) = cfg.rtp_destination;

        let mut command = Command::new(&cfg.binary_path);
        command
            .arg("-rtsp_transport")
            .arg("tcp")
            .arg("-i")
            .arg(&cfg.rtsp_url)
            .arg("-c:v")
            .arg("libx264")
            .arg("-profile:v")
            .arg("baseline")
            .arg("-level")
            .arg("3.0")
            .arg("-x264opts")
            .arg("packetization-mode=1")
            .arg("-r")
            .arg("30")
            .arg("-b:v")
            .arg("1500k")
            .arg("-maxrate")
            .arg("1500k")
            .arg("-bufsize")
            .arg("3000k")
            .arg("-f")
            .arg("rtp")
            .arg(format!("rtp://{rtp_host}:{rtp_port}"))
            .arg("-c:v")
            .arg("libx264")
            .arg("-f")
            .arg("hls")
            .arg("-hls_time")
            .arg(cfg.segment_seconds.to_string())
            // ffmpeg defaults to keeping only the last 5 entries in the
            // playlist; the retention pruner, not ffmpeg, owns deciding
            // when a segment drops out of the historical index (§4.8).
            .arg("-hls_list_size")
            .arg("0")
            .arg("-hls_segment_filename")
            .arg(segment_pattern)
            .arg("-hls_flags")
            .arg("append_list+program_date_time")
            .arg(playlist_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = command.spawn()?;
        let pid = child.id();
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut recent: Vec<String> = Vec::with_capacity(20);
            let mut connected_sent = false;

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        recent.push(line.clone());
                        if recent.len() > 20 {
                            recent.remove(0);
                        }

                        if !connected_sent && line.contains(CONNECTED_MARKER) {
                            connected_sent = true;
                            if tx.send(TranscoderEvent::Connected).await.is_err() {
                                return;
                            }
                        }

                        if let Some(failure) = classify_fatal(&line) {
                            if tx.send(TranscoderEvent::FatalError(failure)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }

            // stderr closed; the process is exiting (or already has). Reap
            // it here so the reported exit code is real, not guessed.
            let exit_code = child.wait().await.ok().and_then(|s| s.code());
            let _ = tx
                .send(TranscoderEvent::Exited {
                    exit_code,
                    last_stderr_lines: recent,
                })
                .await;
        });

        Ok(Self { pid, events: rx })
    }

    /// Stops the transcoder: sends SIGTERM, waits [`GRACE_PERIOD`], then
    /// SIGKILL (§4.5 termination contract). The actual reap happens in the
    /// stderr-monitoring task spawned in [`Self::spawn`]; this only signals.
    pub async fn stop(self) -> anyhow::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = nix::unistd::Pid::from_raw(pid as i32);

        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        tokio::time::sleep(GRACE_PERIOD).await;
        // ESRCH (process already gone) is the expected common case; ignore.
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);

        Ok(())
    }
}

fn classify_fatal(line: &str) -> Option<TranscoderFailure> {
    if FATAL_CONNECTION_REFUSED.iter().any(|p| line.contains(p)) {
        return Some(TranscoderFailure::ConnectionRefused(line.to_string()));
    }
    if FATAL_NO_VIDEO.iter().any(|p| line.contains(p)) {
        return Some(TranscoderFailure::NoVideoTrack(line.to_string()));
    }
    if FATAL_CODEC_NEGOTIATION.iter().any(|p| line.contains(p)) {
        return Some(TranscoderFailure::CodecNegotiationFailed(line.to_string()));
    }
    None
}
