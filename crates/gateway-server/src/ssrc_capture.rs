//! Bind-sniff-release SSRC capture (§4.4). Runs before the SFU producer is
//! created so the Producer's RTP parameters can carry the real SSRC the
//! transcoder will stamp on its packets.

use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(8);
const RELEASE_QUIESCENCE: Duration = Duration::from_millis(100);
const MIN_RTP_HEADER_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SsrcCaptureError {
    #[error("no RTP datagram received within the capture window")]
    Timeout,
    #[error("failed to bind capture socket: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Binds `port`, waits for the first plausible RTP datagram, extracts its
/// SSRC, then closes the socket and waits briefly for the OS to release the
/// port before the SFU rebinds it.
pub async fn capture_ssrc(port: u16) -> Result<u32, SsrcCaptureError> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    let mut buf = [0u8; 2048];

    let deadline = tokio::time::Instant::now() + CAPTURE_TIMEOUT;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(SsrcCaptureError::Timeout);
        }

        let read = match timeout(remaining, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(_)) => continue,
            Err(_) => return Err(SsrcCaptureError::Timeout),
        };

        if read < MIN_RTP_HEADER_LEN {
            continue;
        }

        let version = buf[0] >> 6;
        if version != 2 {
            // Not an RTP packet (version field always 2); keep listening.
            continue;
        }

        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        drop(socket);
        tokio::time::sleep(RELEASE_QUIESCENCE).await;
        return Ok(ssrc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_ssrc_from_first_valid_rtp_packet() {
        let port = 31200;
        let handle = tokio::spawn(capture_ssrc(port));

        // Give the capturer a moment to bind before sending.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sender = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        let mut packet = vec![0u8; 12];
        packet[0] = 0x80; // version 2, no padding/extension
        packet[8..12].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
        sender.send_to(&packet, ("127.0.0.1", port)).await.unwrap();

        let ssrc = handle.await.unwrap().unwrap();
        assert_eq!(ssrc, 0xDEADBEEF);
    }

    #[tokio::test]
    async fn discards_short_datagrams_and_keeps_listening() {
        let port = 31201;
        let handle = tokio::spawn(capture_ssrc(port));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sender = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        sender.send_to(&[1, 2, 3], ("127.0.0.1", port)).await.unwrap();

        let mut packet = vec![0u8; 12];
        packet[0] = 0x80;
        packet[8..12].copy_from_slice(&42u32.to_be_bytes());
        sender.send_to(&packet, ("127.0.0.1", port)).await.unwrap();

        let ssrc = handle.await.unwrap().unwrap();
        assert_eq!(ssrc, 42);
    }
}
