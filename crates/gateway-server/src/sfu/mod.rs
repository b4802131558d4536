//! Request/response + event channel to the SFU worker process (§4.2).
//!
//! Each outbound call carries a correlation id; a single reader task
//! dispatches inbound frames back to the pending future that requested
//! them, or broadcasts them as events. The wire framing is length-delimited
//! JSON over a TCP control socket, the networked analogue of the
//! netstring-over-pipe channel a local SFU worker process would use.

use crate::error::{AppError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use gateway_protocol::sfu::{CorrelationId, SfuEvent, SfuMethod, SfuReply, SfuRequest};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PENDING_CALLS: usize = 4096;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

type PendingReply = oneshot::Sender<std::result::Result<serde_json::Value, String>>;

/// A persistent control-channel client to the remote SFU worker.
pub struct SfuControlClient {
    next_id: AtomicU32,
    pending: Arc<DashMap<CorrelationId, PendingReply>>,
    outbound: mpsc::Sender<Bytes>,
    events: broadcast::Sender<(SfuEvent, serde_json::Value)>,
    disconnected: broadcast::Sender<()>,
}

impl SfuControlClient {
    /// Connects to the SFU worker's control endpoint and spawns the
    /// reader/writer tasks that service it for the client's lifetime.
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (mut read_half, mut write_half) = stream.into_split();

        let pending: Arc<DashMap<CorrelationId, PendingReply>> = Arc::new(DashMap::new());
        let (events_tx, _) = broadcast::channel(256);
        let (disconnected_tx, _) = broadcast::channel(1);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(256);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let len = (frame.len() as u32).to_be_bytes();
                if write_half.write_all(&len).await.is_err() {
                    break;
                }
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_events = events_tx.clone();
        let reader_disconnected = disconnected_tx.clone();
        tokio::spawn(async move {
            loop {
                let mut len_buf = [0u8; 4];
                if read_half.read_exact(&mut len_buf).await.is_err() {
                    break;
                }
                let len = u32::from_be_bytes(len_buf);
                if len > MAX_FRAME_LEN {
                    tracing::error!(len, "SFU frame exceeds maximum length, dropping connection");
                    break;
                }
                let mut buf = vec![0u8; len as usize];
                if read_half.read_exact(&mut buf).await.is_err() {
                    break;
                }

                match serde_json::from_slice::<SfuReply>(&buf) {
                    Ok(SfuReply::Response { id, ok, data, error }) => {
                        if let Some((_, tx)) = reader_pending.remove(&id) {
                            let result = if ok {
                                Ok(data)
                            } else {
                                Err(error.unwrap_or_else(|| "unknown SFU error".to_string()))
                            };
                            let _ = tx.send(result);
                        } else {
                            tracing::warn!(correlation_id = id, "SFU reply matched no pending call");
                        }
                    }
                    Ok(SfuReply::Event { event, data }) => {
                        let _ = reader_events.send((event, data));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed SFU frame");
                    }
                }
            }

            // Channel closed: fail every pending call and announce disconnect.
            reader_pending.clear();
            let _ = reader_disconnected.send(());
            tracing::error!("SFU control channel disconnected");
        });

        Ok(Self {
            next_id: AtomicU32::new(1),
            pending,
            outbound: outbound_tx,
            events: events_tx,
            disconnected: disconnected_tx,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<(SfuEvent, serde_json::Value)> {
        self.events.subscribe()
    }

    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnected.subscribe()
    }

    /// Issues one RPC and awaits its matched reply, subject to a per-call
    /// timeout (§4.2).
    pub async fn call(&self, method: SfuMethod, data: serde_json::Value) -> Result<serde_json::Value> {
        if self.pending.len() >= MAX_PENDING_CALLS {
            return Err(AppError::SfuOverloaded);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = SfuRequest { id, method, data };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| AppError::SfuUnavailable(format!("failed to encode request: {e}")))?;

        if self.outbound.send(Bytes::from(payload)).await.is_err() {
            self.pending.remove(&id);
            return Err(AppError::SfuUnavailable("control channel closed".to_string()));
        }

        match tokio::time::timeout(DEFAULT_CALL_TIMEOUT, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            // The channel round-tripped fine; the SFU itself said no. Kept
            // distinct from the branches below so callers like consumer
            // attach can tell a real rejection from an outage.
            Ok(Ok(Err(msg))) => Err(AppError::SfuRejected(msg)),
            Ok(Err(_)) => Err(AppError::SfuUnavailable("SFU control channel dropped".to_string())),
            Err(_) => {
                self.pending.remove(&id);
                Err(AppError::SfuUnavailable("SFU call timed out".to_string()))
            }
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| AppError::SfuUnavailable(format!("malformed SFU response: {e}")))
    }

    pub async fn get_router_rtp_capabilities(&self) -> Result<serde_json::Value> {
        self.call(SfuMethod::GetRouterRtpCapabilities, serde_json::json!({}))
            .await
    }

    pub async fn create_plain_transport(
        &self,
        params: gateway_protocol::sfu::CreatePlainTransportParams,
    ) -> Result<gateway_protocol::sfu::PlainTransportInfo> {
        let value = self
            .call(SfuMethod::CreatePlainTransport, serde_json::to_value(params).unwrap())
            .await?;
        Self::decode(value)
    }

    pub async fn connect_plain_transport(
        &self,
        params: gateway_protocol::sfu::ConnectPlainTransportParams,
    ) -> Result<()> {
        self.call(SfuMethod::ConnectPlainTransport, serde_json::to_value(params).unwrap())
            .await?;
        Ok(())
    }

    pub async fn create_producer(
        &self,
        params: gateway_protocol::sfu::CreateProducerParams,
    ) -> Result<gateway_protocol::sfu::ProducerInfo> {
        let value = self
            .call(SfuMethod::CreateProducer, serde_json::to_value(params).unwrap())
            .await?;
        Self::decode(value)
    }

    pub async fn create_webrtc_transport(&self, announced_ip: &str) -> Result<gateway_protocol::sfu::WebrtcTransportInfo> {
        let value = self
            .call(
                SfuMethod::CreateWebrtcTransport,
                serde_json::json!({ "announcedIp": announced_ip }),
            )
            .await?;
        Self::decode(value)
    }

    pub async fn connect_webrtc_transport(
        &self,
        transport_id: &str,
        dtls_parameters: serde_json::Value,
    ) -> Result<()> {
        self.call(
            SfuMethod::ConnectWebrtcTransport,
            serde_json::json!({ "transportId": transport_id, "dtlsParameters": dtls_parameters }),
        )
        .await?;
        Ok(())
    }

    pub async fn create_consumer(
        &self,
        params: gateway_protocol::sfu::CreateConsumerParams,
    ) -> Result<gateway_protocol::sfu::ConsumerInfo> {
        let value = self
            .call(SfuMethod::CreateConsumer, serde_json::to_value(params).unwrap())
            .await?;
        Self::decode(value)
    }

    pub async fn close_producer(&self, producer_id: &str) -> Result<()> {
        self.call(SfuMethod::CloseProducer, serde_json::json!({ "producerId": producer_id }))
            .await?;
        Ok(())
    }

    pub async fn close_transport(&self, transport_id: &str) -> Result<()> {
        self.call(
            SfuMethod::CloseTransport,
            serde_json::json!({ "transportId": transport_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn close_transports_for_room(&self, room_id: &str) -> Result<()> {
        self.call(
            SfuMethod::CloseTransportsForRoom,
            serde_json::json!({ "roomId": room_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn get_producer_stats(&self, producer_id: &str) -> Result<gateway_protocol::sfu::ProducerStats> {
        let value = self
            .call(
                SfuMethod::GetProducerStats,
                serde_json::json!({ "producerId": producer_id }),
            )
            .await?;
        Self::decode(value)
    }

    pub async fn get_all_producer_stats(&self) -> Result<Vec<gateway_protocol::sfu::ProducerStats>> {
        let value = self
            .call(SfuMethod::GetAllProducerStats, serde_json::json!({}))
            .await?;
        Self::decode(value)
    }
}
