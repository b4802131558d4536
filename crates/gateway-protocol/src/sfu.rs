//! Wire types for the SFU control channel (§4.2).
//!
//! The gateway and the SFU worker are two cooperating processes; everything
//! in this module crosses that boundary. Modeled on mediasoup's JSON
//! request/notification shape: every request carries a numeric id the
//! response echoes back, so the client can match responses to pending
//! calls out of order.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub type CorrelationId = u32;

#[derive(Debug, Clone, Serialize)]
pub struct SfuRequest {
    pub id: CorrelationId,
    pub method: SfuMethod,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SfuMethod {
    GetRouterRtpCapabilities,
    CreatePlainTransport,
    ConnectPlainTransport,
    CreateProducer,
    CreateWebrtcTransport,
    ConnectWebrtcTransport,
    CreateConsumer,
    CloseProducer,
    CloseTransport,
    CloseTransportsForRoom,
    GetProducerStats,
    GetAllProducerStats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SfuReply {
    Response {
        id: CorrelationId,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        data: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: SfuEvent,
        data: serde_json::Value,
    },
}

/// Unsolicited notifications the worker can push without a matching
/// request — the producer-closed / transport-closed paths that feed the
/// stream state machine's health events (§4.3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SfuEvent {
    ProducerClosed,
    TransportClosed,
    ConsumerClosed,
    ConsumerDtlsFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePlainTransportParams {
    pub listen_ip: std::net::IpAddr,
    pub port: Option<u16>,
    pub comedia: bool,
    pub rtcp_mux: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlainTransportInfo {
    pub id: String,
    pub ip: std::net::IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectPlainTransportParams {
    pub transport_id: String,
    pub remote: SocketAddr,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateProducerParams {
    pub transport_id: String,
    pub kind: String,
    pub ssrc: u32,
    pub payload_type: u8,
    pub mime_type: String,
    pub clock_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerInfo {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub jitter_ms: f64,
    pub fraction_lost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebrtcTransportInfo {
    pub id: String,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConsumerParams {
    pub transport_id: String,
    pub producer_id: String,
    pub rtp_capabilities: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerInfo {
    pub id: String,
    pub kind: String,
    pub rtp_parameters: serde_json::Value,
}
