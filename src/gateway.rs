//! Gateway host loop: relay serial stream in, ingest records out, time
//! sync back to the relay after every packet.

use crate::error::GatewayError;
use bytes::BytesMut;
use chrono::NaiveDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::time::Duration;
use tracing::{debug, info, warn};
use worksafe_lib::host::{HostReceiver, HostStats};
use worksafe_lib::serial::TimeSync;

const READ_CHUNK: usize = 512;

/// A partial frame with no new bytes for this long is abandoned.
pub const PARTIAL_FRAME_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub records_written: u64,
    pub time_syncs_sent: u64,
    pub host: HostStats,
}

/// Decodes the relay stream and writes one JSON ingest record per line.
pub struct Gateway<O> {
    host: HostReceiver,
    records: O,
    records_written: u64,
    time_syncs_sent: u64,
    partial_timeout: Duration,
}

impl<O: AsyncWrite + Unpin> Gateway<O> {
    pub fn new(records: O) -> Self {
        Self {
            host: HostReceiver::new(),
            records,
            records_written: 0,
            time_syncs_sent: 0,
            partial_timeout: PARTIAL_FRAME_TIMEOUT,
        }
    }

    pub fn with_partial_timeout(mut self, timeout: Duration) -> Self {
        self.partial_timeout = timeout;
        self
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            records_written: self.records_written,
            time_syncs_sent: self.time_syncs_sent,
            host: self.host.stats(),
        }
    }

    pub fn into_inner(self) -> O {
        self.records
    }

    /// Feed serial bytes; returns how many records were written.
    pub async fn ingest(&mut self, data: &[u8], now: NaiveDateTime) -> Result<u64, GatewayError> {
        self.host.push(data);
        let mut written = 0;
        while let Some(frame) = self.host.next_frame() {
            debug!(
                payload = hex::encode(&frame.packet.payload),
                "Frame {} from {}", frame.packet.frame_counter, frame.packet.device_id
            );
            let mut line = frame.to_record(now).to_json()?;
            line.push('\n');
            self.records.write_all(line.as_bytes()).await?;
            written += 1;
        }
        if written > 0 {
            self.records.flush().await?;
            self.records_written += written;
        }
        Ok(written)
    }

    /// Drop whatever partial frame is buffered, writing any records that
    /// decode once the stale bytes are gone.
    pub async fn flush_partial(&mut self, now: NaiveDateTime) -> Result<u64, GatewayError> {
        let stale = self.host.buffered();
        if stale == 0 {
            return Ok(0);
        }
        warn!("Abandoning {} bytes of an incomplete frame", stale);
        let mut written = 0;
        while self.host.expire_partial() {
            written += self.ingest(&[], now).await?;
        }
        Ok(written)
    }

    /// Run until the serial input reaches end of file. When `reply` is set,
    /// a time sync for `clock()` is written to it after every packet.
    /// A partial frame is abandoned once the input has been idle for the
    /// partial timeout, and at end of file.
    pub async fn run<R, W>(
        &mut self,
        serial: &mut R,
        mut reply: Option<&mut W>,
        clock: impl Fn() -> NaiveDateTime,
    ) -> Result<GatewayStats, GatewayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let mut eof = false;
        while !eof {
            buf.clear();
            let read = tokio::time::timeout(self.partial_timeout, serial.read_buf(&mut buf)).await;
            let (packets, now) = match read {
                Ok(read) => {
                    let now = clock();
                    if read? == 0 {
                        eof = true;
                        (self.flush_partial(now).await?, now)
                    } else {
                        (self.ingest(&buf, now).await?, now)
                    }
                }
                Err(_) => {
                    let now = clock();
                    (self.flush_partial(now).await?, now)
                }
            };

            if let Some(reply) = reply.as_mut() {
                let sync = TimeSync::from_datetime(&now).encode();
                for _ in 0..packets {
                    reply.write_all(&sync).await?;
                    self.time_syncs_sent += 1;
                }
                if packets > 0 {
                    reply.flush().await?;
                }
            }
        }

        let stats = self.stats();
        info!(
            "Serial input ended: {} records, {} parse errors, {} framing errors, {} bytes skipped",
            stats.records_written,
            stats.host.parse_errors,
            stats.host.frame_errors,
            stats.host.skipped_bytes
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::NaiveDate;
    use worksafe_lib::ingest::IngestRecord;
    use worksafe_lib::serial::RelayFrame;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn relayed(counter: u8) -> Bytes {
        // "WS-0042", counter, realtime, 10-byte payload
        let mut packet = hex::decode("57532d30303432000000").unwrap();
        packet.extend_from_slice(&[counter, 0x00, 0x01]);
        packet.extend_from_slice(&hex::decode("01489073400101000000").unwrap());
        RelayFrame::new(Bytes::from(packet), -70, 9.0).unwrap().encode()
    }

    #[tokio::test]
    async fn test_records_and_time_syncs() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&relayed(0));
        stream.extend_from_slice(&[0x13, 0x37]);
        stream.extend_from_slice(&relayed(1));

        let mut serial: &[u8] = &stream;
        let mut replies = Vec::new();
        let mut gateway = Gateway::new(Vec::new());
        let stats = gateway
            .run(&mut serial, Some(&mut replies), noon)
            .await
            .unwrap();

        assert_eq!(stats.records_written, 2);
        assert_eq!(stats.time_syncs_sent, 2);
        assert_eq!(stats.host.skipped_bytes, 2);

        assert_eq!(replies.len(), 20);
        let sync = TimeSync::decode(&replies[..10]).unwrap();
        assert_eq!(sync.to_datetime(), Some(noon()));

        let output = String::from_utf8(gateway.into_inner()).unwrap();
        let records: Vec<IngestRecord> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].frame_counter, 1);
        assert_eq!(records[0].device_id, "WS-0042");
        assert_eq!(records[0].rssi, -70);
        assert_eq!(records[0].timestamp, noon());
    }

    #[tokio::test]
    async fn test_trailing_partial_frame_dropped_at_eof() {
        let mut stream = relayed(3).to_vec();
        stream.extend_from_slice(&[0xAA, 0x40, 0x01, 0x02]);

        let mut serial: &[u8] = &stream;
        let mut gateway = Gateway::new(Vec::new());
        let stats = gateway
            .run(&mut serial, None::<&mut Vec<u8>>, noon)
            .await
            .unwrap();

        assert_eq!(stats.records_written, 1);
        assert_eq!(stats.host.frame_errors, 1);
        assert_eq!(stats.host.skipped_bytes, 4);
        assert_eq!(gateway.host.buffered(), 0);
    }

    #[tokio::test]
    async fn test_stalled_frame_expires_on_read_timeout() {
        let timeout = Duration::from_millis(20);
        let (mut relay_end, mut serial) = tokio::io::duplex(256);
        let mut gateway = Gateway::new(Vec::new()).with_partial_timeout(timeout);

        let feeder = async move {
            relay_end.write_all(&[0xAA, 0x40, 0x01]).await.unwrap();
            tokio::time::sleep(timeout * 5).await;
            relay_end.write_all(&relayed(4)).await.unwrap();
        };
        let (stats, ()) = tokio::join!(
            gateway.run(&mut serial, None::<&mut Vec<u8>>, noon),
            feeder
        );
        let stats = stats.unwrap();

        assert_eq!(stats.records_written, 1);
        assert_eq!(stats.host.frame_errors, 1);
        assert_eq!(stats.host.skipped_bytes, 3);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let frame = relayed(7);
        let mut gateway = Gateway::new(Vec::new());
        assert_eq!(gateway.ingest(&frame[..9], noon()).await.unwrap(), 0);
        assert_eq!(gateway.ingest(&frame[9..], noon()).await.unwrap(), 1);
        assert_eq!(gateway.stats().host.packets_received, 1);
    }
}
