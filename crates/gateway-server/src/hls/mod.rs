//! HLS segment index and retention pruning (§4.8).
//!
//! Segment filenames embed the Unix-epoch start time; the rolling M3U8
//! playlist lists their `#EXTINF` durations. Translating a wall-clock
//! timestamp into a segment requires nothing but iterating and accumulating
//! durations — no separate index file is maintained.

use crate::state::Config;
use chrono::{DateTime, Utc};
use m3u8_rs::Playlist;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HlsError {
    #[error("no recording data for the requested range")]
    NoRecordingData,
    #[error("failed to read playlist: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed playlist")]
    Malformed,
}

#[derive(Debug, Clone)]
pub struct SegmentRef {
    pub filename: String,
    pub start: DateTime<Utc>,
    pub duration: Duration,
}

/// Resolved position of a wall-clock instant within the segment timeline.
#[derive(Debug, Clone)]
pub struct SegmentLocation {
    pub segment: SegmentRef,
    pub offset: Duration,
}

fn stream_dir(root: &Path, stream_id: Uuid) -> PathBuf {
    root.join(stream_id.to_string())
}

/// Parses the rolling playlist for `stream_id` into an ordered list of
/// segments with absolute start times.
pub fn read_segments(recordings_root: &Path, stream_id: Uuid) -> Result<Vec<SegmentRef>, HlsError> {
    let playlist_path = stream_dir(recordings_root, stream_id).join("playlist.m3u8");
    let bytes = std::fs::read(&playlist_path)?;

    let media_playlist = match m3u8_rs::parse_playlist_res(&bytes) {
        Ok(Playlist::MediaPlaylist(p)) => p,
        _ => return Err(HlsError::Malformed),
    };

    let mut segments = Vec::with_capacity(media_playlist.segments.len());
    for seg in &media_playlist.segments {
        let epoch = epoch_from_filename(&seg.uri).ok_or(HlsError::Malformed)?;
        segments.push(SegmentRef {
            filename: seg.uri.clone(),
            start: DateTime::from_timestamp(epoch, 0).ok_or(HlsError::Malformed)?,
            duration: Duration::from_secs_f32(seg.duration),
        });
    }

    Ok(segments)
}

fn epoch_from_filename(uri: &str) -> Option<i64> {
    // segment-<unix_epoch>.ts
    let stem = uri.strip_prefix("segment-")?.strip_suffix(".ts")?;
    stem.parse().ok()
}

/// Locates the segment covering wall-clock instant `t`: the segment whose
/// `[start, start + duration)` contains it. Gaps between restarts produce
/// holes that surface as `NoRecordingData` (§4.8).
pub fn locate(segments: &[SegmentRef], t: DateTime<Utc>) -> Result<SegmentLocation, HlsError> {
    for segment in segments {
        let end = segment.start + chrono::Duration::from_std(segment.duration).unwrap_or_default();
        if segment.start <= t && t < end {
            let offset = (t - segment.start).to_std().unwrap_or_default();
            return Ok(SegmentLocation {
                segment: segment.clone(),
                offset,
            });
        }
    }
    Err(HlsError::NoRecordingData)
}

/// Background task removing segments older than the configured retention
/// window. Coordinates with in-flight extraction reads via a per-stream
/// read/write lock so a segment pinned by an active extraction is pruned
/// only after it releases (§4.8, §5 shared-resource rules).
pub struct HlsRetentionPruner {
    config: Config,
    segment_locks: dashmap::DashMap<Uuid, Arc<RwLock<()>>>,
}

impl HlsRetentionPruner {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            segment_locks: dashmap::DashMap::new(),
        }
    }

    pub fn lock_for(&self, stream_id: Uuid) -> Arc<RwLock<()>> {
        self.segment_locks
            .entry(stream_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune_once().await {
                    tracing::warn!(error = %e, "HLS retention pruning pass failed");
                }
            }
        });
    }

    async fn prune_once(&self) -> std::io::Result<()> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);

        let mut entries = tokio::fs::read_dir(&self.config.recordings_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(stream_id) = Uuid::parse_str(&entry.file_name().to_string_lossy()) else {
                continue;
            };

            let lock = self.lock_for(stream_id);
            let _guard = lock.write().await;

            let Ok(segments) = read_segments(&self.config.recordings_root, stream_id) else {
                continue;
            };

            let mut removed = HashSet::new();
            for segment in segments {
                if segment.start < cutoff {
                    let path = entry.path().join(&segment.filename);
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        removed.insert(segment.filename);
                    }
                }
            }

            if !removed.is_empty() {
                if let Err(e) =
                    rewrite_playlist(&self.config.recordings_root, stream_id, &removed).await
                {
                    tracing::warn!(%stream_id, error = %e, "failed to rewrite HLS playlist after pruning");
                }
            }
        }

        Ok(())
    }
}

/// Drops pruned segments from the playlist so the historical index
/// (`read_segments`) never points at a file pruning already removed.
/// `media_sequence` advances by the number dropped, per the HLS convention
/// for segments leaving the front of the list.
async fn rewrite_playlist(
    recordings_root: &Path,
    stream_id: Uuid,
    removed: &HashSet<String>,
) -> std::io::Result<()> {
    let playlist_path = stream_dir(recordings_root, stream_id).join("playlist.m3u8");
    let bytes = tokio::fs::read(&playlist_path).await?;

    let mut playlist = match m3u8_rs::parse_playlist_res(&bytes) {
        Ok(Playlist::MediaPlaylist(p)) => p,
        _ => return Ok(()),
    };

    let dropped = playlist.segments.iter().filter(|s| removed.contains(&s.uri)).count();
    playlist.segments.retain(|s| !removed.contains(&s.uri));
    playlist.media_sequence += dropped as u64;

    let mut buf = Vec::new();
    playlist.write_to(&mut buf)?;

    let tmp_path = playlist_path.with_extension("m3u8.tmp");
    tokio::fs::write(&tmp_path, &buf).await?;
    tokio::fs::rename(&tmp_path, &playlist_path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(epoch: i64, dur: u64) -> SegmentRef {
        SegmentRef {
            filename: format!("segment-{epoch}.ts"),
            start: DateTime::from_timestamp(epoch, 0).unwrap(),
            duration: Duration::from_secs(dur),
        }
    }

    #[test]
    fn locates_segment_covering_instant() {
        let segments = vec![seg(1000, 6), seg(1006, 6), seg(1012, 6)];
        let t = DateTime::from_timestamp(1008, 0).unwrap();
        let loc = locate(&segments, t).unwrap();
        assert_eq!(loc.segment.filename, "segment-1006.ts");
        assert_eq!(loc.offset, Duration::from_secs(2));
    }

    #[test]
    fn gap_between_segments_is_no_recording_data() {
        let segments = vec![seg(1000, 6), seg(2000, 6)];
        let t = DateTime::from_timestamp(1500, 0).unwrap();
        assert!(matches!(locate(&segments, t), Err(HlsError::NoRecordingData)));
    }

    #[test]
    fn parses_epoch_from_filename() {
        assert_eq!(epoch_from_filename("segment-1700000000.ts"), Some(1_700_000_000));
        assert_eq!(epoch_from_filename("playlist.m3u8"), None);
    }
}
