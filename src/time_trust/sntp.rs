//! Minimal SNTP (RFC 4330) client used as the trusted time reference.

use std::time::{Duration as StdDuration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::{
    net::{lookup_host, UdpSocket},
    sync::Mutex,
    time,
};

use super::reference::{ReferenceTime, TimeReferenceService};
use crate::config::TimeTrustConfig;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const PACKET_LEN: usize = 48;
/// Seconds from the NTP epoch (1900) to the Unix epoch.
const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;
/// LI = 0, VN = 4, Mode = 3 (client).
const CLIENT_HEADER: u8 = 0b00_100_011;
const MODE_SERVER: u8 = 4;
const LEAP_ALARM: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SntpResponse {
    pub leap: u8,
    pub version: u8,
    pub mode: u8,
    pub stratum: u8,
    pub originate: u64,
    pub receive: u64,
    pub transmit: u64,
}

pub fn to_ntp_timestamp(time: DateTime<Utc>) -> u64 {
    let secs = (time.timestamp() + NTP_UNIX_OFFSET_SECS) as u64 & 0xffff_ffff;
    let fraction = (u64::from(time.timestamp_subsec_nanos()) << 32) / 1_000_000_000;
    (secs << 32) | fraction
}

/// Decode an NTP timestamp. Seconds with the top bit clear belong to era 1 (2036 onward).
pub fn from_ntp_timestamp(value: u64) -> Option<DateTime<Utc>> {
    let raw_secs = value >> 32;
    let era_secs = if raw_secs & 0x8000_0000 == 0 {
        raw_secs + (1 << 32)
    } else {
        raw_secs
    };
    let fraction = value & 0xffff_ffff;
    let nanos = ((fraction * 1_000_000_000) >> 32) as u32;
    DateTime::<Utc>::from_timestamp(era_secs as i64 - NTP_UNIX_OFFSET_SECS, nanos)
}

pub fn build_request(transmit: DateTime<Utc>) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet[40..48].copy_from_slice(&to_ntp_timestamp(transmit).to_be_bytes());
    packet
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

pub fn parse_response(buf: &[u8]) -> Result<SntpResponse> {
    if buf.len() < PACKET_LEN {
        bail!("SNTP response too short ({} bytes)", buf.len());
    }

    Ok(SntpResponse {
        leap: buf[0] >> 6,
        version: (buf[0] >> 3) & 0b111,
        mode: buf[0] & 0b111,
        stratum: buf[1],
        originate: read_u64(buf, 24),
        receive: read_u64(buf, 32),
        transmit: read_u64(buf, 40),
    })
}

/// Reject responses a client must not trust.
pub fn validate_response(response: &SntpResponse, request_transmit: u64) -> Result<()> {
    if response.mode != MODE_SERVER {
        bail!("unexpected SNTP mode {}", response.mode);
    }
    if response.stratum == 0 {
        bail!("SNTP kiss-of-death response");
    }
    if response.leap == LEAP_ALARM {
        bail!("SNTP server clock is unsynchronized");
    }
    if response.transmit == 0 {
        bail!("SNTP response has no transmit timestamp");
    }
    if response.originate != request_transmit {
        bail!("SNTP response does not answer our request");
    }
    Ok(())
}

/// Offset of server time relative to the local clock: `((t2 - t1) + (t3 - t4)) / 2`.
pub fn clock_offset(
    sent: DateTime<Utc>,
    server_receive: DateTime<Utc>,
    server_transmit: DateTime<Utc>,
    received: DateTime<Utc>,
) -> Duration {
    ((server_receive - sent) + (server_transmit - received)) / 2
}

pub struct SntpClient {
    servers: Vec<String>,
    timeout: StdDuration,
    max_age: StdDuration,
    cached: Mutex<Option<ReferenceTime>>,
}

impl SntpClient {
    pub fn new(servers: Vec<String>, timeout: StdDuration, max_age: StdDuration) -> Self {
        Self {
            servers,
            timeout,
            max_age,
            cached: Mutex::new(None),
        }
    }

    pub fn from_config(config: &TimeTrustConfig) -> Self {
        Self::new(
            config.ntp_servers.clone(),
            StdDuration::from_secs(config.ntp_timeout_secs),
            StdDuration::from_secs(config.reference_max_age_secs),
        )
    }

    async fn fetch(&self) -> Result<ReferenceTime> {
        let mut last_error = None;
        for server in &self.servers {
            match time::timeout(self.timeout, query_server(server)).await {
                Ok(Ok(reference)) => {
                    log_debug!("SNTP reference from {server}: {}", reference.now().to_rfc3339());
                    return Ok(reference);
                }
                Ok(Err(err)) => {
                    log_warn!("SNTP query to {server} failed: {err:#}");
                    last_error = Some(err);
                }
                Err(_) => {
                    log_warn!("SNTP query to {server} timed out after {:?}", self.timeout);
                    last_error = Some(anyhow!("SNTP query to {server} timed out"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no SNTP servers configured")))
    }
}

#[async_trait]
impl TimeReferenceService for SntpClient {
    async fn fetch_if_needed(&self) -> Result<ReferenceTime> {
        // Held across the fetch so concurrent callers share a single request.
        let mut cached = self.cached.lock().await;
        if let Some(reference) = *cached {
            if reference.age() < self.max_age {
                return Ok(reference);
            }
        }

        let reference = self.fetch().await?;
        *cached = Some(reference);
        Ok(reference)
    }
}

async fn query_server(server: &str) -> Result<ReferenceTime> {
    let addr = lookup_host(server)
        .await
        .with_context(|| format!("failed to resolve {server}"))?
        .next()
        .ok_or_else(|| anyhow!("{server} resolved to no addresses"))?;

    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .context("failed to bind SNTP socket")?;
    socket
        .connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    let sent = Utc::now();
    let request = build_request(sent);
    socket.send(&request).await.context("failed to send SNTP request")?;

    let mut buf = [0u8; 128];
    let len = socket.recv(&mut buf).await.context("failed to receive SNTP response")?;
    let received = Utc::now();
    let anchor = Instant::now();

    let response = parse_response(&buf[..len])?;
    validate_response(&response, read_u64(&request, 40))?;

    let server_receive = from_ntp_timestamp(response.receive)
        .ok_or_else(|| anyhow!("invalid SNTP receive timestamp"))?;
    let server_transmit = from_ntp_timestamp(response.transmit)
        .ok_or_else(|| anyhow!("invalid SNTP transmit timestamp"))?;

    let offset = clock_offset(sent, server_receive, server_transmit, received);
    Ok(ReferenceTime::anchored(received + offset, anchor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn server_reply(request: &[u8], server_time: DateTime<Utc>, stratum: u8) -> [u8; PACKET_LEN] {
        let mut reply = [0u8; PACKET_LEN];
        reply[0] = 0b00_100_100;
        reply[1] = stratum;
        reply[24..32].copy_from_slice(&request[40..48]);
        let stamp = to_ntp_timestamp(server_time).to_be_bytes();
        reply[32..40].copy_from_slice(&stamp);
        reply[40..48].copy_from_slice(&stamp);
        reply
    }

    async fn fake_server(skew: Duration, requests: Arc<AtomicUsize>) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 128];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                requests.fetch_add(1, Ordering::SeqCst);
                let reply = server_reply(&buf[..len], Utc::now() + skew, 2);
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        addr.to_string()
    }

    #[test]
    fn timestamp_conversion_keeps_subsecond_precision() {
        let time = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 15).unwrap()
            + Duration::milliseconds(250);
        let decoded = from_ntp_timestamp(to_ntp_timestamp(time)).unwrap();
        let error = (decoded - time).num_microseconds().unwrap().abs();
        assert!(error < 1, "conversion error {error}us");
    }

    #[test]
    fn timestamps_after_2036_use_next_era() {
        let time = Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(from_ntp_timestamp(to_ntp_timestamp(time)), Some(time));
    }

    #[test]
    fn request_header_is_client_mode() {
        let request = build_request(Utc::now());
        let header = request[0];
        assert_eq!(header >> 6, 0);
        assert_eq!((header >> 3) & 0b111, 4);
        assert_eq!(header & 0b111, 3);
    }

    #[test]
    fn rejects_untrustworthy_responses() {
        let request = build_request(Utc::now());
        let originate = read_u64(&request, 40);
        let good = parse_response(&server_reply(&request, Utc::now(), 1)).unwrap();
        assert!(validate_response(&good, originate).is_ok());

        let kiss = parse_response(&server_reply(&request, Utc::now(), 0)).unwrap();
        assert!(validate_response(&kiss, originate).is_err());

        let mut alarm = good;
        alarm.leap = LEAP_ALARM;
        assert!(validate_response(&alarm, originate).is_err());

        assert!(validate_response(&good, originate + 1).is_err());
        assert!(parse_response(&request[..20]).is_err());
    }

    #[test]
    fn offset_cancels_symmetric_network_delay() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // Server is 300s ahead, 100ms each way.
        let t2 = t1 + Duration::seconds(300) + Duration::milliseconds(100);
        let t3 = t2 + Duration::milliseconds(10);
        let t4 = t1 + Duration::milliseconds(210);
        assert_eq!(clock_offset(t1, t2, t3, t4), Duration::seconds(300));
    }

    #[tokio::test]
    async fn fetches_reference_from_server() {
        let requests = Arc::new(AtomicUsize::new(0));
        let server = fake_server(Duration::seconds(600), requests.clone()).await;
        let client = SntpClient::new(
            vec![server],
            StdDuration::from_secs(2),
            StdDuration::from_secs(60),
        );

        let reference = client.fetch_if_needed().await.unwrap();
        let offset = reference.now() - Utc::now();
        assert!((offset - Duration::seconds(600)).num_seconds().abs() <= 1);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let requests = Arc::new(AtomicUsize::new(0));
        let server = fake_server(Duration::zero(), requests.clone()).await;
        let client = Arc::new(SntpClient::new(
            vec![server],
            StdDuration::from_secs(2),
            StdDuration::from_secs(60),
        ));

        let (a, b) = tokio::join!(client.fetch_if_needed(), client.fetch_if_needed());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_through_to_next_server() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap().to_string();
        let requests = Arc::new(AtomicUsize::new(0));
        let server = fake_server(Duration::zero(), requests.clone()).await;

        let client = SntpClient::new(
            vec![silent_addr, server],
            StdDuration::from_millis(200),
            StdDuration::from_secs(60),
        );

        assert!(client.fetch_if_needed().await.is_ok());
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        drop(silent);
    }

    #[tokio::test]
    async fn no_servers_is_an_error() {
        let client = SntpClient::new(Vec::new(), StdDuration::from_secs(1), StdDuration::ZERO);
        assert!(client.fetch_if_needed().await.is_err());
    }
}
