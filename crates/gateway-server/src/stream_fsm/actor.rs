use super::{Mailbox, StreamSnapshot};
use crate::port_broker::PortBroker;
use crate::sfu::SfuControlClient;
use crate::ssrc_capture::{capture_ssrc, SsrcCaptureError};
use crate::state::Config;
use crate::transcoder::{TranscoderConfig, TranscoderEvent, TranscoderFailure, TranscoderHandle};
use chrono::Utc;
use gateway_protocol::sfu::{
    ConnectPlainTransportParams, CreatePlainTransportParams, CreateProducerParams, SfuEvent,
};
use gateway_protocol::StreamState;
use sqlx::PgPool;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

const MAX_RETRIES: i32 = 3;
const RETRY_BACKOFFS_SECS: [u64; 3] = [5, 10, 20];
const START_DEADLINE: Duration = Duration::from_secs(30);
const READINESS_WINDOW: Duration = Duration::from_secs(5);

pub struct StreamContext {
    pub stream_id: Uuid,
    pub device_id: Uuid,
    pub rtsp_url: String,
    pub db: PgPool,
    pub sfu: Arc<SfuControlClient>,
    pub port_broker: Arc<PortBroker>,
    pub config: Config,
}

enum Outcome {
    Live(TranscoderHandle),
    SetupFailed(String, StreamState),
}

enum LiveExit {
    Stopped,
    Errored(String),
}

/// Drives one stream from INITIALIZING through its lifecycle until it
/// reaches CLOSED, publishing every transition on `snapshot_tx` and
/// persisting audit rows along the way (§4.3, §4.9, design note on
/// "retries are not silent").
pub async fn run_stream_actor(
    ctx: StreamContext,
    mut mailbox: mpsc::Receiver<Mailbox>,
    snapshot_tx: watch::Sender<StreamSnapshot>,
) {
    let mut retry_count = 0i32;

    loop {
        publish(&snapshot_tx, |s| {
            s.state = StreamState::Initializing;
            s.retry_count = retry_count;
        });
        // Only a retry actually transitioned through ERROR to get here; the
        // first activation has no prior state and gets no audit row.
        if retry_count > 0 {
            audit(&ctx, StreamState::Error, StreamState::Initializing, None).await;
        }

        let outcome = match tokio::time::timeout(
            START_DEADLINE,
            drive_to_live(&ctx, &snapshot_tx, &mut mailbox),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Outcome::SetupFailed(
                "start deadline exceeded".to_string(),
                StreamState::Error,
            ),
        };

        let live_exit = match outcome {
            Outcome::Live(transcoder_events) => {
                Some(run_live(&ctx, &snapshot_tx, &mut mailbox, transcoder_events).await)
            }
            Outcome::SetupFailed(reason, to_state) => {
                transition(&ctx, &snapshot_tx, to_state, Some(reason)).await;
                if to_state == StreamState::Stopped {
                    return;
                }
                None
            }
        };

        if let Some(exit) = live_exit {
            match exit {
                LiveExit::Stopped => {
                    transition(&ctx, &snapshot_tx, StreamState::Stopped, None).await;
                    return;
                }
                LiveExit::Errored(reason) => {
                    transition(&ctx, &snapshot_tx, StreamState::Error, Some(reason)).await;
                }
            }
        }

        // ERROR -> retry with backoff, up to MAX_RETRIES, else CLOSED.
        if retry_count >= MAX_RETRIES {
            transition(
                &ctx,
                &snapshot_tx,
                StreamState::Closed,
                Some("retries exhausted".to_string()),
            )
            .await;
            return;
        }

        let backoff = RETRY_BACKOFFS_SECS[retry_count as usize % RETRY_BACKOFFS_SECS.len()];
        retry_count += 1;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            msg = mailbox.recv() => {
                if let Some(Mailbox::Stop { reply }) = msg {
                    transition(&ctx, &snapshot_tx, StreamState::Stopped, None).await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }
}

async fn drive_to_live(
    ctx: &StreamContext,
    snapshot_tx: &watch::Sender<StreamSnapshot>,
    mailbox: &mut mpsc::Receiver<Mailbox>,
) -> Outcome {
    // 1. Reserve a port.
    let port = match ctx.port_broker.reserve(ctx.stream_id) {
        Ok(p) => p,
        Err(_) => {
            return Outcome::SetupFailed("no UDP ports available".to_string(), StreamState::Error)
        }
    };
    publish(snapshot_tx, |s| s.assigned_port = Some(port));
    let _ = sqlx::query!(
        "UPDATE streams SET assigned_port = $1 WHERE id = $2",
        port as i32,
        ctx.stream_id,
    )
    .execute(&ctx.db)
    .await;

    // 2. Spawn the transcoder pointed at our own capture socket.
    let announced_ip: IpAddr = ctx
        .config
        .announced_public_ip
        .parse()
        .unwrap_or_else(|_| "127.0.0.1".parse().unwrap());

    let mut transcoder = match TranscoderHandle::spawn(TranscoderConfig {
        binary_path: ctx.config.transcoder_binary.clone(),
        rtsp_url: ctx.rtsp_url.clone(),
        rtp_destination: (announced_ip.to_string(), port),
        recordings_root: ctx.config.recordings_root.clone(),
        stream_id: ctx.stream_id,
        segment_seconds: ctx.config.hls_segment_seconds,
    }) {
        Ok(t) => t,
        Err(e) => {
            ctx.port_broker.release(ctx.stream_id);
            return Outcome::SetupFailed(
                format!("failed to spawn transcoder: {e}"),
                StreamState::Error,
            );
        }
    };

    // 3. Sniff the SSRC, racing against an early fatal transcoder error and
    //    an explicit Stop.
    let ssrc = tokio::select! {
        result = capture_ssrc(port) => {
            match result {
                Ok(ssrc) => ssrc,
                Err(SsrcCaptureError::Timeout) => {
                    abort_setup(ctx, transcoder).await;
                    return Outcome::SetupFailed("SSRC_CAPTURE_FAILED: no RTP within 8s".to_string(), StreamState::Error);
                }
                Err(e) => {
                    abort_setup(ctx, transcoder).await;
                    return Outcome::SetupFailed(format!("SSRC_CAPTURE_FAILED: {e}"), StreamState::Error);
                }
            }
        }
        Some(TranscoderEvent::FatalError(failure)) = transcoder.events.recv() => {
            let reason = describe_failure(failure);
            abort_setup(ctx, transcoder).await;
            return Outcome::SetupFailed(reason, StreamState::Error);
        }
        msg = mailbox.recv() => {
            abort_setup(ctx, transcoder).await;
            if let Some(Mailbox::Stop { reply }) = msg {
                let _ = reply.send(());
                return Outcome::SetupFailed("stopped during setup".to_string(), StreamState::Stopped);
            }
            return Outcome::SetupFailed("mailbox closed during setup".to_string(), StreamState::Error);
        }
    };
    publish(snapshot_tx, |s| s.captured_ssrc = Some(ssrc));
    let _ = sqlx::query!(
        "UPDATE streams SET captured_ssrc = $1 WHERE id = $2",
        ssrc as i64,
        ctx.stream_id,
    )
    .execute(&ctx.db)
    .await;

    // 4. Hand the port to the SFU and create the Producer.
    let transport = match ctx
        .sfu
        .create_plain_transport(CreatePlainTransportParams {
            listen_ip: announced_ip,
            port: Some(port),
            comedia: false,
            rtcp_mux: true,
        })
        .await
    {
        Ok(t) => t,
        Err(e) => {
            abort_setup(ctx, transcoder).await;
            return Outcome::SetupFailed(format!("SFU_UNAVAILABLE: {e}"), StreamState::Error);
        }
    };

    if let Err(e) = ctx
        .sfu
        .connect_plain_transport(ConnectPlainTransportParams {
            transport_id: transport.id.clone(),
            remote: std::net::SocketAddr::new(announced_ip, port),
        })
        .await
    {
        let _ = ctx.sfu.close_transport(&transport.id).await;
        abort_setup(ctx, transcoder).await;
        return Outcome::SetupFailed(format!("SFU_UNAVAILABLE: {e}"), StreamState::Error);
    }

    let producer = match ctx
        .sfu
        .create_producer(CreateProducerParams {
            transport_id: transport.id.clone(),
            kind: "video".to_string(),
            ssrc,
            payload_type: 96,
            mime_type: "video/H264".to_string(),
            clock_rate: 90_000,
        })
        .await
    {
        Ok(p) => p,
        Err(e) => {
            let _ = ctx.sfu.close_transport(&transport.id).await;
            abort_setup(ctx, transcoder).await;
            return Outcome::SetupFailed(
                format!("failed to create SFU producer: {e}"),
                StreamState::Error,
            );
        }
    };

    let producer_ref = Uuid::new_v4();
    let _ = sqlx::query!(
        "INSERT INTO producers (id, stream_id, sfu_id, ssrc, transport_sfu_id) VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (stream_id) DO UPDATE SET id = EXCLUDED.id, sfu_id = EXCLUDED.sfu_id, \
         ssrc = EXCLUDED.ssrc, transport_sfu_id = EXCLUDED.transport_sfu_id",
        producer_ref,
        ctx.stream_id,
        producer.id,
        ssrc as i64,
        transport.id,
    )
    .execute(&ctx.db)
    .await;
    let _ = sqlx::query!(
        "UPDATE streams SET producer_ref = $1 WHERE id = $2",
        producer_ref,
        ctx.stream_id,
    )
    .execute(&ctx.db)
    .await;

    publish(snapshot_tx, |s| {
        s.sfu_producer_id = Some(producer.id.clone());
        s.sfu_transport_id = Some(transport.id.clone());
        s.producer_ref = Some(producer_ref);
    });
    transition(ctx, snapshot_tx, StreamState::Ready, None).await;

    // 5. Wait for the readiness predicate: transcoder connected AND the SFU
    //    reports nonzero bytes received, within the readiness window.
    let mut saw_connected = false;
    let readiness = tokio::time::timeout(READINESS_WINDOW, async {
        loop {
            if let Some(event) = transcoder.events.recv().await {
                match event {
                    TranscoderEvent::Connected => saw_connected = true,
                    TranscoderEvent::FatalError(f) => return Err(describe_failure(f)),
                    TranscoderEvent::Exited { last_stderr_lines, .. } => {
                        return Err(format!(
                            "transcoder exited during readiness: {last_stderr_lines:?}"
                        ));
                    }
                }
            }

            if saw_connected {
                if let Ok(stats) = ctx.sfu.get_producer_stats(&producer.id).await {
                    if stats.packets_received > 0 || stats.bytes_received > 0 {
                        return Ok(());
                    }
                }
            }
        }
    })
    .await;

    match readiness {
        Ok(Ok(())) => {
            let started_at = Utc::now();
            let _ = sqlx::query!(
                "UPDATE streams SET started_at = $1 WHERE id = $2",
                started_at,
                ctx.stream_id,
            )
            .execute(&ctx.db)
            .await;
            publish(snapshot_tx, |s| s.started_at = Some(started_at));
            Outcome::Live(transcoder)
        }
        Ok(Err(reason)) => {
            let _ = ctx.sfu.close_producer(&producer.id).await;
            let _ = ctx.sfu.close_transport(&transport.id).await;
            abort_setup(ctx, transcoder).await;
            Outcome::SetupFailed(reason, StreamState::Error)
        }
        Err(_) => {
            let _ = ctx.sfu.close_producer(&producer.id).await;
            let _ = ctx.sfu.close_transport(&transport.id).await;
            abort_setup(ctx, transcoder).await;
            Outcome::SetupFailed(
                "PRODUCE_FAILED: readiness window exceeded".to_string(),
                StreamState::Error,
            )
        }
    }
}

/// Releases the reserved port and terminates the partially-started
/// transcoder when setup is abandoned at any step (§5 cancellation rule:
/// "whatever partial resources exist" get torn down).
async fn abort_setup(ctx: &StreamContext, transcoder: TranscoderHandle) {
    ctx.port_broker.release(ctx.stream_id);
    let _ = transcoder.stop().await;
}

async fn run_live(
    ctx: &StreamContext,
    snapshot_tx: &watch::Sender<StreamSnapshot>,
    mailbox: &mut mpsc::Receiver<Mailbox>,
    mut transcoder: TranscoderHandle,
) -> LiveExit {
    transition(ctx, snapshot_tx, StreamState::Live, None).await;
    let mut sfu_events = ctx.sfu.subscribe_events();
    let mut disconnected = ctx.sfu.subscribe_disconnect();

    loop {
        tokio::select! {
            msg = mailbox.recv() => {
                match msg {
                    Some(Mailbox::Stop { reply }) => {
                        teardown(ctx, snapshot_tx, Some(transcoder)).await;
                        let _ = reply.send(());
                        return LiveExit::Stopped;
                    }
                    Some(Mailbox::HealthTick { media_flowing: false }) => {
                        teardown(ctx, snapshot_tx, Some(transcoder)).await;
                        return LiveExit::Errored("no media: packets and bytes flat".to_string());
                    }
                    Some(_) => {}
                    None => {
                        teardown(ctx, snapshot_tx, Some(transcoder)).await;
                        return LiveExit::Stopped;
                    }
                }
            }
            event = transcoder.events.recv() => {
                match event {
                    Some(TranscoderEvent::Exited { exit_code, last_stderr_lines }) => {
                        // The process is already gone; nothing left to signal.
                        teardown(ctx, snapshot_tx, None).await;
                        return LiveExit::Errored(format!(
                            "transcoder-died{{exit_code={exit_code:?}, last_stderr_lines={last_stderr_lines:?}}}"
                        ));
                    }
                    Some(TranscoderEvent::FatalError(f)) => {
                        teardown(ctx, snapshot_tx, Some(transcoder)).await;
                        return LiveExit::Errored(describe_failure(f));
                    }
                    _ => {}
                }
            }
            Ok((event, _)) = sfu_events.recv() => {
                if matches!(event, SfuEvent::ProducerClosed | SfuEvent::TransportClosed) {
                    teardown(ctx, snapshot_tx, Some(transcoder)).await;
                    return LiveExit::Errored("SFU transport/producer closed".to_string());
                }
            }
            _ = disconnected.recv() => {
                teardown(ctx, snapshot_tx, Some(transcoder)).await;
                return LiveExit::Errored("SFU_UNAVAILABLE: control channel disconnected".to_string());
            }
        }
    }
}

async fn teardown(
    ctx: &StreamContext,
    snapshot_tx: &watch::Sender<StreamSnapshot>,
    transcoder: Option<TranscoderHandle>,
) {
    let snap = snapshot_tx.borrow().clone();
    if let Some(producer_id) = &snap.sfu_producer_id {
        let _ = ctx.sfu.close_producer(producer_id).await;
    }
    if let Some(transport_id) = &snap.sfu_transport_id {
        let _ = ctx.sfu.close_transport(transport_id).await;
    }
    if let Some(transcoder) = transcoder {
        let _ = transcoder.stop().await;
    }
    ctx.port_broker.release(ctx.stream_id);
}

fn describe_failure(failure: TranscoderFailure) -> String {
    match failure {
        TranscoderFailure::ConnectionRefused(l) => format!("RTSP_CONNECTION_FAILED: {l}"),
        TranscoderFailure::NoVideoTrack(l) => format!("TRANSCODER_ERROR: no video track: {l}"),
        TranscoderFailure::CodecNegotiationFailed(l) => {
            format!("TRANSCODER_ERROR: codec negotiation failed: {l}")
        }
        TranscoderFailure::Unknown(l) => format!("TRANSCODER_ERROR: {l}"),
    }
}

fn publish(tx: &watch::Sender<StreamSnapshot>, f: impl FnOnce(&mut StreamSnapshot)) {
    tx.send_modify(f);
}

async fn transition(
    ctx: &StreamContext,
    snapshot_tx: &watch::Sender<StreamSnapshot>,
    to: StreamState,
    reason: Option<String>,
) {
    let from = snapshot_tx.borrow().state;
    publish(snapshot_tx, |s| {
        s.state = to;
        if let Some(r) = &reason {
            s.last_error = Some(r.clone());
        }
    });
    audit(ctx, from, to, reason.as_deref()).await;

    let _ = sqlx::query!(
        "UPDATE streams SET state = $1, last_error = $2 WHERE id = $3",
        to,
        reason,
        ctx.stream_id,
    )
    .execute(&ctx.db)
    .await;
}

async fn audit(ctx: &StreamContext, from: StreamState, to: StreamState, reason: Option<&str>) {
    let _ = sqlx::query!(
        "INSERT INTO stream_audit_events (id, stream_id, from_state, to_state, reason) VALUES ($1, $2, $3, $4, $5)",
        Uuid::new_v4(),
        ctx.stream_id,
        from,
        to,
        reason,
    )
    .execute(&ctx.db)
    .await;
}
