//! Bounded worker pool executing snapshot and bookmark extraction jobs
//! against the live pipe or the HLS archive (§4.7).

use crate::error::{AppError, Result};
use crate::hls::{self, HlsError};
use crate::state::Config;
use chrono::{DateTime, Utc};
use gateway_protocol::{JobStatus, Source};
use sqlx::PgPool;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const SNAPSHOT_LIVE_DEADLINE: Duration = Duration::from_secs(5);
const SNAPSHOT_HISTORICAL_DEADLINE: Duration = Duration::from_secs(10);
const BOOKMARK_DEADLINE_FLOOR: Duration = Duration::from_secs(15);
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ExtractionJob {
    Snapshot {
        id: Uuid,
        stream_id: Uuid,
        source: Source,
        timestamp: DateTime<Utc>,
        rtsp_url: String,
    },
    Bookmark {
        id: Uuid,
        stream_id: Uuid,
        source: Source,
        center_timestamp: DateTime<Utc>,
        before: Duration,
        after: Duration,
        rtsp_url: String,
    },
}

/// A bounded FIFO of extraction jobs serviced by a fixed worker count. Job
/// status transitions are exclusive and monotone: PROCESSING -> (READY |
/// FAILED), enforced by never writing a status update once one of those two
/// terminal values has been persisted.
pub struct ExtractionWorkerPool {
    db: PgPool,
    config: Config,
    worker_count: usize,
    queue_tx: mpsc::Sender<ExtractionJob>,
    queue_rx: tokio::sync::Mutex<Option<mpsc::Receiver<ExtractionJob>>>,
}

impl ExtractionWorkerPool {
    pub fn new(db: PgPool, config: Config, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            db,
            config,
            worker_count,
            queue_tx: tx,
            queue_rx: tokio::sync::Mutex::new(Some(rx)),
        }
    }

    pub fn spawn_workers(self: Arc<Self>) {
        let rx = self
            .queue_rx
            .try_lock()
            .expect("spawn_workers called once at startup")
            .take()
            .expect("workers already spawned");

        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..self.worker_count {
            let pool = self.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => pool.run_job(worker_id, job).await,
                        None => break,
                    }
                }
            });
        }
    }

    /// Enqueues a job, returning `Backlogged` if the bounded queue is full
    /// (§5 backpressure rule).
    pub fn enqueue(&self, job: ExtractionJob) -> Result<()> {
        self.queue_tx
            .try_send(job)
            .map_err(|_| AppError::Backlogged)
    }

    async fn run_job(&self, worker_id: usize, job: ExtractionJob) {
        match job {
            ExtractionJob::Snapshot { id, stream_id, source, timestamp, rtsp_url } => {
                self.run_snapshot(worker_id, id, stream_id, source, timestamp, rtsp_url).await;
            }
            ExtractionJob::Bookmark { id, stream_id, source, center_timestamp, before, after, rtsp_url } => {
                self.run_bookmark(worker_id, id, stream_id, source, center_timestamp, before, after, rtsp_url).await;
            }
        }
    }

    async fn is_tombstoned_snapshot(&self, id: Uuid) -> bool {
        sqlx::query_scalar!("SELECT tombstoned FROM snapshots WHERE id = $1", id)
            .fetch_optional(&self.db)
            .await
            .ok()
            .flatten()
            .unwrap_or(false)
    }

    async fn is_tombstoned_bookmark(&self, id: Uuid) -> bool {
        sqlx::query_scalar!("SELECT tombstoned FROM bookmarks WHERE id = $1", id)
            .fetch_optional(&self.db)
            .await
            .ok()
            .flatten()
            .unwrap_or(false)
    }

    async fn run_snapshot(
        &self,
        worker_id: usize,
        id: Uuid,
        stream_id: Uuid,
        source: Source,
        timestamp: DateTime<Utc>,
        rtsp_url: String,
    ) {
        let deadline = match source {
            Source::Live => SNAPSHOT_LIVE_DEADLINE,
            Source::Historical => SNAPSHOT_HISTORICAL_DEADLINE,
        };

        let image_path = self.config.snapshots_root.join(format!("{id}.jpg"));
        let result = tokio::time::timeout(deadline, self.extract_frame(&source, stream_id, timestamp, &rtsp_url, &image_path)).await;

        if self.is_tombstoned_snapshot(id).await {
            let _ = tokio::fs::remove_file(&image_path).await;
            return;
        }

        match result {
            Ok(Ok(())) => {
                let _ = sqlx::query!(
                    "UPDATE snapshots SET status = $1, image_path = $2 WHERE id = $3 AND status = $4",
                    JobStatus::Ready as JobStatus,
                    image_path.to_string_lossy().to_string(),
                    id,
                    JobStatus::Processing as JobStatus,
                )
                .execute(&self.db)
                .await;
            }
            Ok(Err(e)) => {
                tracing::warn!(worker_id, %id, error = %e, "snapshot extraction failed");
                self.fail_snapshot(id, &e.to_string()).await;
            }
            Err(_) => {
                self.fail_snapshot(id, "EXTRACTION_TIMEOUT").await;
            }
        }
    }

    async fn fail_snapshot(&self, id: Uuid, error: &str) {
        let _ = sqlx::query!(
            "UPDATE snapshots SET status = $1, error = $2 WHERE id = $3 AND status = $4",
            JobStatus::Failed as JobStatus,
            error,
            id,
            JobStatus::Processing as JobStatus,
        )
        .execute(&self.db)
        .await;
    }

    async fn run_bookmark(
        &self,
        worker_id: usize,
        id: Uuid,
        stream_id: Uuid,
        source: Source,
        center_timestamp: DateTime<Utc>,
        before: Duration,
        after: Duration,
        rtsp_url: String,
    ) {
        if source == Source::Live {
            // The after-window must elapse before the HLS recorder has
            // actually written it; the live bookmark always resolves
            // through the historical path once that time has passed.
            tokio::time::sleep(after).await;
        }

        let deadline = BOOKMARK_DEADLINE_FLOOR + before + after;
        let video_path = self.config.bookmarks_root.join(format!("{id}.mp4"));
        let thumb_path = self.config.bookmarks_root.join(format!("{id}.jpg"));

        let result = tokio::time::timeout(
            deadline,
            self.extract_clip(stream_id, center_timestamp, before, after, &rtsp_url, &video_path, &thumb_path),
        )
        .await;

        if self.is_tombstoned_bookmark(id).await {
            let _ = tokio::fs::remove_file(&video_path).await;
            let _ = tokio::fs::remove_file(&thumb_path).await;
            return;
        }

        match result {
            Ok(Ok(())) => {
                let _ = sqlx::query!(
                    "UPDATE bookmarks SET status = $1, video_path = $2, thumbnail_path = $3 \
                     WHERE id = $4 AND status = $5",
                    JobStatus::Ready as JobStatus,
                    video_path.to_string_lossy().to_string(),
                    thumb_path.to_string_lossy().to_string(),
                    id,
                    JobStatus::Processing as JobStatus,
                )
                .execute(&self.db)
                .await;
            }
            Ok(Err(e)) => {
                tracing::warn!(worker_id, %id, error = %e, "bookmark extraction failed");
                self.fail_bookmark(id, &e.to_string()).await;
            }
            Err(_) => {
                self.fail_bookmark(id, "EXTRACTION_TIMEOUT").await;
            }
        }
    }

    async fn fail_bookmark(&self, id: Uuid, error: &str) {
        let _ = sqlx::query!(
            "UPDATE bookmarks SET status = $1, error = $2 WHERE id = $3 AND status = $4",
            JobStatus::Failed as JobStatus,
            error,
            id,
            JobStatus::Processing as JobStatus,
        )
        .execute(&self.db)
        .await;
    }

    /// Snapshot(LIVE) spawns a short-lived transcoder against the RTSP
    /// source and grabs one keyframe; Snapshot(HISTORICAL) locates the
    /// covering HLS segment and decodes at the matching offset.
    async fn extract_frame(
        &self,
        source: &Source,
        stream_id: Uuid,
        timestamp: DateTime<Utc>,
        rtsp_url: &str,
        out: &std::path::Path,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(self.config.snapshots_root.clone()).await.ok();

        match source {
            Source::Live => {
                run_transcoder_frame_grab(&self.config.transcoder_binary, rtsp_url, out).await
            }
            Source::Historical => {
                let segments = hls::read_segments(&self.config.recordings_root, stream_id)
                    .map_err(map_hls_err)?;
                let location = hls::locate(&segments, timestamp).map_err(map_hls_err)?;
                let segment_path = self
                    .config
                    .recordings_root
                    .join(stream_id.to_string())
                    .join(&location.segment.filename);
                run_transcoder_segment_frame(&self.config.transcoder_binary, &segment_path, location.offset, out).await
            }
        }
    }

    /// Bookmark(HISTORICAL) slices the HLS archive from `center - before` to
    /// `center + after`, re-muxing without re-encoding when the window
    /// aligns to segment boundaries.
    async fn extract_clip(
        &self,
        stream_id: Uuid,
        center: DateTime<Utc>,
        before: Duration,
        after: Duration,
        _rtsp_url: &str,
        video_out: &std::path::Path,
        thumb_out: &std::path::Path,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(self.config.bookmarks_root.clone()).await.ok();

        let start = center - chrono::Duration::from_std(before).unwrap_or_default();
        let end = center + chrono::Duration::from_std(after).unwrap_or_default();

        let segments = hls::read_segments(&self.config.recordings_root, stream_id).map_err(map_hls_err)?;
        let start_loc = hls::locate(&segments, start).map_err(map_hls_err)?;
        let end_loc = hls::locate(&segments, end).map_err(map_hls_err)?;

        // The window may straddle several 6s segments (e.g. a 5s-before/
        // 5s-after bookmark almost always does); re-mux the whole run of
        // covered segments via ffmpeg's concat demuxer and only then seek
        // to the requested offsets, rather than trimming a single file.
        let covered: Vec<&hls::SegmentRef> = segments
            .iter()
            .filter(|s| s.start >= start_loc.segment.start && s.start <= end_loc.segment.start)
            .collect();
        if covered.is_empty() {
            anyhow::bail!("NO_RECORDING_DATA");
        }

        let stream_dir = self.config.recordings_root.join(stream_id.to_string());
        let end_offset = covered[..covered.len() - 1]
            .iter()
            .map(|s| s.duration)
            .sum::<Duration>()
            + end_loc.offset;

        run_transcoder_clip_mux(
            &self.config.transcoder_binary,
            &stream_dir,
            &covered,
            start_loc.offset,
            end_offset,
            video_out,
            thumb_out,
        )
        .await
    }
}

fn map_hls_err(e: HlsError) -> anyhow::Error {
    match e {
        HlsError::NoRecordingData => anyhow::anyhow!("NO_RECORDING_DATA"),
        other => anyhow::anyhow!(other),
    }
}

async fn run_transcoder_frame_grab(binary: &std::path::Path, rtsp_url: &str, out: &std::path::Path) -> anyhow::Result<()> {
    let status = tokio::process::Command::new(binary)
        .arg("-rtsp_transport").arg("tcp")
        .arg("-i").arg(rtsp_url)
        .arg("-frames:v").arg("1")
        .arg("-q:v").arg("2")
        .arg("-y")
        .arg(out)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        anyhow::bail!("frame grab process exited with {status}");
    }
    Ok(())
}

async fn run_transcoder_segment_frame(
    binary: &std::path::Path,
    segment_path: &std::path::Path,
    offset: Duration,
    out: &std::path::Path,
) -> anyhow::Result<()> {
    let status = tokio::process::Command::new(binary)
        .arg("-ss").arg(format!("{:.3}", offset.as_secs_f64()))
        .arg("-i").arg(segment_path)
        .arg("-frames:v").arg("1")
        .arg("-q:v").arg("2")
        .arg("-y")
        .arg(out)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        anyhow::bail!("segment frame decode exited with {status}");
    }
    Ok(())
}

/// Re-muxes the run of HLS segments covering `[start, end]` into one MP4.
/// When the window spans more than one segment (the common case for any
/// clip longer than the segment duration), the segments are first stitched
/// with ffmpeg's concat demuxer so the subsequent `-ss`/`-to` trim can be
/// expressed as a single pair of offsets into the stitched stream, rather
/// than re-seeking per source file.
async fn run_transcoder_clip_mux(
    binary: &std::path::Path,
    stream_dir: &std::path::Path,
    segments: &[&hls::SegmentRef],
    start_offset: Duration,
    end_offset: Duration,
    video_out: &std::path::Path,
    thumb_out: &std::path::Path,
) -> anyhow::Result<()> {
    let concat_list_path = video_out.with_extension("concat.txt");
    let list_body = segments
        .iter()
        .map(|s| format!("file '{}'\n", stream_dir.join(&s.filename).display()))
        .collect::<String>();
    tokio::fs::write(&concat_list_path, list_body).await?;

    let status = tokio::process::Command::new(binary)
        .arg("-f").arg("concat")
        .arg("-safe").arg("0")
        .arg("-i").arg(&concat_list_path)
        .arg("-ss").arg(format!("{:.3}", start_offset.as_secs_f64()))
        .arg("-to").arg(format!("{:.3}", end_offset.as_secs_f64()))
        .arg("-c").arg("copy")
        .arg("-y")
        .arg(video_out)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    let _ = tokio::fs::remove_file(&concat_list_path).await;

    if !status.success() {
        anyhow::bail!("clip mux exited with {status}");
    }

    // §4.7: "thumbnail = middle frame" — seek by timestamp into the muxed
    // clip rather than grabbing its first frame.
    let mid_offset = end_offset.saturating_sub(start_offset) / 2;
    let thumb_status = tokio::process::Command::new(binary)
        .arg("-ss").arg(format!("{:.3}", mid_offset.as_secs_f64()))
        .arg("-i").arg(video_out)
        .arg("-frames:v").arg("1")
        .arg("-y")
        .arg(thumb_out)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !thumb_status.success() {
        anyhow::bail!("thumbnail extraction exited with {thumb_status}");
    }

    Ok(())
}
