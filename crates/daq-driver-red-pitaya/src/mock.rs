//! In-process emulator of the radar streaming firmware.
//!
//! Speaks the device side of the protocol: accepts the configure command,
//! the waveform payload and the trigger, then streams the uploaded waveform
//! back cyclically until the client goes away. Records can be dropped at a
//! fixed interval to fake stream discontinuities.

use crate::command::{Command, CONFIGURE_BYTES, TRIGGER_BYTES};
use crate::waveform::{SampleRecord, RECORD_BYTES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDeviceConfig {
    /// Skip waveform records after every this many streamed records
    pub drop_every: Option<u64>,

    /// Records skipped at each drop
    pub drop_len: usize,

    /// Records per write while streaming
    pub chunk_records: usize,

    /// Close the connection after streaming this many records
    pub max_records: Option<u64>,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            drop_every: None,
            drop_len: 1,
            chunk_records: 4096,
            max_records: None,
        }
    }
}

/// What the emulator saw and sent during one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub sample_rate_hz: u32,
    pub waveform_records: usize,
    pub records_streamed: u64,
    pub records_dropped: u64,
    pub drop_events: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MockRadar {
    config: MockDeviceConfig,
}

impl MockRadar {
    pub fn new(config: MockDeviceConfig) -> Self {
        Self { config }
    }

    /// Bind a loopback-style listener and serve the first connection in a task.
    pub async fn spawn_listener(
        self,
        bind: &str,
    ) -> Result<(SocketAddr, JoinHandle<Result<MockStats>>)> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to bind mock device on {}", bind))?;
        let addr = listener.local_addr()?;
        tracing::info!("Mock radar listening on {}", addr);

        let handle = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.context("Mock accept failed")?;
            tracing::info!("Mock radar accepted {}", peer);
            stream.set_nodelay(true)?;
            self.serve(stream).await
        });
        Ok((addr, handle))
    }

    /// Run the device side of one session on `stream`.
    pub async fn serve<S>(&self, mut stream: S) -> Result<MockStats>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut raw = [0u8; CONFIGURE_BYTES];
        stream
            .read_exact(&mut raw)
            .await
            .context("Mock failed to read configure command")?;
        let (sample_rate_hz, payload_bytes) = match Command::decode_configure(&raw)? {
            Command::Configure {
                sample_rate_hz,
                payload_bytes,
            } => (sample_rate_hz, payload_bytes as usize),
            Command::Trigger => anyhow::bail!("Expected configure, got trigger"),
        };
        if payload_bytes == 0 || payload_bytes % RECORD_BYTES != 0 {
            anyhow::bail!("Payload length {} is not whole records", payload_bytes);
        }
        tracing::debug!(
            "Mock configure: rate={} Hz, payload={} bytes",
            sample_rate_hz,
            payload_bytes
        );

        let mut payload = vec![0u8; payload_bytes];
        stream
            .read_exact(&mut payload)
            .await
            .context("Mock failed to read waveform payload")?;
        let waveform: Vec<SampleRecord> = payload
            .chunks_exact(RECORD_BYTES)
            .map(|c| {
                let mut rec = [0u8; RECORD_BYTES];
                rec.copy_from_slice(c);
                SampleRecord::from_le_bytes(&rec)
            })
            .collect();

        let mut raw = [0u8; TRIGGER_BYTES];
        stream
            .read_exact(&mut raw)
            .await
            .context("Mock failed to read trigger")?;
        Command::decode_trigger(&raw)?;
        tracing::debug!("Mock triggered, streaming {} record waveform", waveform.len());

        let mut stats = MockStats {
            sample_rate_hz,
            waveform_records: waveform.len(),
            ..Default::default()
        };
        self.stream_waveform(&mut stream, &waveform, &mut stats)
            .await?;
        Ok(stats)
    }

    async fn stream_waveform<S>(
        &self,
        stream: &mut S,
        waveform: &[SampleRecord],
        stats: &mut MockStats,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let chunk_records = self.config.chunk_records.max(1);
        let mut chunk = Vec::with_capacity(chunk_records * RECORD_BYTES);
        let mut cursor = 0usize;

        loop {
            chunk.clear();
            while chunk.len() < chunk_records * RECORD_BYTES {
                if self
                    .config
                    .max_records
                    .is_some_and(|max| stats.records_streamed >= max)
                {
                    break;
                }
                if let Some(every) = self.config.drop_every.filter(|&n| n > 0) {
                    if stats.records_streamed > 0
                        && stats.records_streamed % every == 0
                        && stats.drop_events < stats.records_streamed / every
                    {
                        cursor = (cursor + self.config.drop_len) % waveform.len();
                        stats.records_dropped += self.config.drop_len as u64;
                        stats.drop_events += 1;
                    }
                }
                waveform[cursor].put(&mut chunk);
                cursor = (cursor + 1) % waveform.len();
                stats.records_streamed += 1;
            }

            if !chunk.is_empty() {
                if let Err(e) = stream.write_all(&chunk).await {
                    if is_peer_gone(&e) {
                        tracing::info!("Mock radar client disconnected: {}", e);
                        return Ok(());
                    }
                    return Err(e).context("Mock failed to stream samples");
                }
            }

            if chunk.len() < chunk_records * RECORD_BYTES {
                tracing::info!(
                    "Mock radar reached record limit after {} records",
                    stats.records_streamed
                );
                let _ = stream.shutdown().await;
                return Ok(());
            }
        }
    }
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
    )
}
