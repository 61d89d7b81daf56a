//! Protocol session with the radar streaming firmware.
//!
//! # Sequence
//!
//! ```text
//! Disconnected -> Connected -> Configuring -> Uploading -> Triggered -> Monitoring
//!                      \____________\_____________\___________\____________\-> Terminated
//! ```
//!
//! 1. Configure: `[20, 1<<28 | rate, 2<<28 | payload_bytes]` (12 bytes)
//! 2. Upload: `payload_bytes` of packed sample records
//! 3. Trigger: `3<<28` (4 bytes, on its own)
//! 4. Monitor: receive full bursts forever and check each for continuity
//!
//! Every stage is a single `write_all`. Any I/O failure moves the session to
//! [`SessionState::Terminated`]; nothing is retried.

use crate::command::Command;
use crate::config::SessionConfig;
use crate::continuity::{BurstReport, ContinuityChecker};
use crate::error::{Stage, StreamError, StreamResult};
use crate::frame::FrameBuffer;
use crate::stop::StopSignal;
use crate::waveform::{self, SampleRecord};
use std::future::Future;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Configuring,
    Uploading,
    Triggered,
    Monitoring,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Configuring => "configuring",
            SessionState::Uploading => "uploading",
            SessionState::Triggered => "triggered",
            SessionState::Monitoring => "monitoring",
            SessionState::Terminated => "terminated",
        };
        write!(f, "{}", label)
    }
}

/// Why a monitor run returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The [`StopSignal`] fired.
    Stopped,
    /// `run_for` elapsed.
    Deadline,
    /// `max_bursts` bursts were checked.
    BurstLimit,
    /// The burst callback asked to stop.
    Halted,
}

/// Totals over one monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSummary {
    pub bursts: u64,
    pub anomalies: u64,
    pub bytes_received: u64,
    /// Largest `dmax` over all bursts.
    pub max_dmax: u64,
    pub reason: StopReason,
}

/// One connection to the device, driven through the fixed handshake and then monitored.
pub struct Session<S> {
    stream: S,
    config: SessionConfig,
    frame: FrameBuffer,
    checker: ContinuityChecker,
    state: SessionState,
}

impl Session<TcpStream> {
    /// Open the TCP connection described by `config.device`.
    ///
    /// Resolution, refusal and timeout are all fatal; there is no retry.
    pub async fn connect(config: SessionConfig) -> StreamResult<Self> {
        config.validate()?;
        let addr = config.device.address();

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| StreamError::InvalidAddress {
                addr: addr.clone(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(StreamError::InvalidAddress {
                addr,
                reason: "no addresses resolved".into(),
            });
        }

        let stream = connect_within(
            &addr,
            config.device.connect_timeout,
            TcpStream::connect(&addrs[..]),
        )
        .await?;

        // Disable Nagle's algorithm so the short command words go out immediately
        stream
            .set_nodelay(true)
            .map_err(|source| StreamError::Connect {
                addr: addr.clone(),
                source,
            })?;

        tracing::info!("Connected to Red Pitaya at {}", addr);
        Self::from_stream(stream, config)
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream.
    pub fn from_stream(stream: S, config: SessionConfig) -> StreamResult<Self> {
        config.validate()?;
        let frame = FrameBuffer::new(config.acquisition.frame_records)?;
        let checker = ContinuityChecker::new(config.monitor.threshold);
        tracing::debug!(
            "Allocated {} byte frame buffer ({} records)",
            frame.byte_len(),
            frame.records()
        );
        Ok(Self {
            stream,
            config,
            frame,
            checker,
            state: SessionState::Connected,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The most recently received burst.
    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> StreamResult<()> {
        if self.state != expected {
            return Err(StreamError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session {} -> {}", self.state, next);
        self.state = next;
    }

    fn terminate(&mut self, err: StreamError) -> StreamError {
        tracing::error!("Session terminated: {}", err);
        self.state = SessionState::Terminated;
        err
    }

    /// Send the 12-byte configure command announcing the payload length.
    pub async fn configure(&mut self) -> StreamResult<()> {
        self.expect_state(SessionState::Connected, "configure")?;

        let acq = &self.config.acquisition;
        let cmd = Command::Configure {
            sample_rate_hz: acq.sample_rate_hz,
            payload_bytes: acq.payload_bytes() as u32,
        };
        let raw = cmd.encode()?;
        tracing::info!(
            "Configuring: sample_rate={} Hz, payload={} bytes",
            acq.sample_rate_hz,
            acq.payload_bytes()
        );

        if let Err(e) = send(&mut self.stream, Stage::Configure, &raw).await {
            return Err(self.terminate(e));
        }
        self.transition(SessionState::Configuring);
        Ok(())
    }

    /// Stage `waveform` in the frame buffer and send it as the payload.
    ///
    /// The waveform must have exactly the length announced by [`Session::configure`].
    pub async fn upload(&mut self, waveform: &[SampleRecord]) -> StreamResult<()> {
        self.expect_state(SessionState::Configuring, "upload")?;

        let announced = self.config.acquisition.waveform_records;
        if waveform.len() != announced {
            return Err(StreamError::Configuration(format!(
                "waveform has {} records but {} were announced",
                waveform.len(),
                announced
            )));
        }

        let payload = self.frame.stage_payload(waveform)?;
        tracing::info!("Uploading {} byte waveform", payload.len());
        let sent = send(&mut self.stream, Stage::Upload, payload).await;
        if let Err(e) = sent {
            return Err(self.terminate(e));
        }
        self.transition(SessionState::Uploading);
        Ok(())
    }

    /// Send the standalone 4-byte trigger word.
    pub async fn trigger(&mut self) -> StreamResult<()> {
        self.expect_state(SessionState::Uploading, "trigger")?;

        let raw = Command::Trigger.encode()?;
        if let Err(e) = send(&mut self.stream, Stage::Trigger, &raw).await {
            return Err(self.terminate(e));
        }
        tracing::info!("Trigger sent, device is streaming");
        self.transition(SessionState::Triggered);
        Ok(())
    }

    /// Generate the reference waveform and run configure, upload and trigger.
    pub async fn start(&mut self) -> StreamResult<()> {
        let waveform = waveform::generate(self.config.acquisition.waveform_records);
        self.configure().await?;
        self.upload(&waveform).await?;
        self.trigger().await
    }

    /// Receive and check bursts until `stop` fires or a configured limit is reached.
    ///
    /// With [`StopSignal::never`] and no `run_for`/`max_bursts` this only
    /// returns on a transport error. `on_burst` sees every report, anomalous
    /// or not. Commands are never re-sent and anomalies never resynchronize
    /// the stream.
    pub async fn run_monitor<F>(
        &mut self,
        stop: StopSignal,
        mut on_burst: F,
    ) -> StreamResult<MonitorSummary>
    where
        F: FnMut(&BurstReport),
    {
        self.monitor_until(stop, |report| {
            on_burst(report);
            ControlFlow::Continue(())
        })
        .await
    }

    /// Like [`Session::run_monitor`], but `on_burst` can end the run by
    /// returning [`ControlFlow::Break`]. The summary then carries
    /// [`StopReason::Halted`] and counts the burst that broke.
    pub async fn monitor_until<F>(
        &mut self,
        mut stop: StopSignal,
        mut on_burst: F,
    ) -> StreamResult<MonitorSummary>
    where
        F: FnMut(&BurstReport) -> ControlFlow<()>,
    {
        self.expect_state(SessionState::Triggered, "monitor")?;
        self.transition(SessionState::Monitoring);

        let monitor = self.config.monitor.clone();
        let deadline = monitor.run_for.map(|d| Instant::now() + d);
        let sleep = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(sleep);

        let burst_bytes = self.frame.byte_len() as u64;
        let mut bursts = 0u64;
        let mut anomalies = 0u64;
        let mut max_dmax = 0u64;

        tracing::info!(
            "Monitoring bursts of {} records (threshold {})",
            self.frame.records(),
            self.checker.threshold()
        );

        let reason = loop {
            if monitor.max_bursts.is_some_and(|max| bursts >= max) {
                break StopReason::BurstLimit;
            }
            if stop.is_stopped() {
                break StopReason::Stopped;
            }

            let received = tokio::select! {
                biased;
                _ = stop.stopped() => None,
                _ = &mut sleep => Some(None),
                res = self.frame.receive(&mut self.stream) => Some(Some(res)),
            };
            match received {
                None => break StopReason::Stopped,
                Some(None) => break StopReason::Deadline,
                Some(Some(Err(e))) => return Err(self.terminate(e)),
                Some(Some(Ok(()))) => {}
            }

            let report = self.checker.check(bursts, &self.frame);
            bursts += 1;
            max_dmax = max_dmax.max(report.dmax);
            if report.anomaly {
                anomalies += 1;
                tracing::warn!(
                    burst = report.burst,
                    dmax = report.dmax,
                    index = report.index,
                    "Continuity anomaly"
                );
            } else {
                tracing::debug!(burst = report.burst, dmax = report.dmax, "Burst ok");
            }
            let flow = on_burst(&report);

            if monitor.summary_interval > 0 && bursts % monitor.summary_interval == 0 {
                tracing::info!(
                    bursts,
                    anomalies,
                    max_dmax,
                    mib = bursts * burst_bytes / (1024 * 1024),
                    "Monitor progress"
                );
            }
            if flow.is_break() {
                break StopReason::Halted;
            }
        };

        let summary = MonitorSummary {
            bursts,
            anomalies,
            bytes_received: bursts * burst_bytes,
            max_dmax,
            reason,
        };
        tracing::info!("Monitor finished: {:?}", summary);
        Ok(summary)
    }
}

/// Bound a connection attempt by `limit`.
async fn connect_within<F, T>(addr: &str, limit: Duration, attempt: F) -> StreamResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    timeout(limit, attempt)
        .await
        .map_err(|_| StreamError::ConnectTimeout {
            addr: addr.to_string(),
            timeout: limit,
        })?
        .map_err(|source| StreamError::Connect {
            addr: addr.to_string(),
            source,
        })
}

async fn send<S>(stream: &mut S, stage: Stage, bytes: &[u8]) -> StreamResult<()>
where
    S: AsyncWrite + Unpin,
{
    let wrap = |source| StreamError::TransportWrite {
        stage,
        bytes: bytes.len(),
        source,
    };
    stream.write_all(bytes).await.map_err(wrap)?;
    stream.flush().await.map_err(wrap)?;
    tracing::debug!("Sent {} bytes ({})", bytes.len(), stage);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CONFIGURE_BYTES, TRIGGER_BYTES};
    use crate::config::{AcquisitionConfig, MonitorConfig};
    use tokio::io::AsyncReadExt;

    fn small_config() -> SessionConfig {
        SessionConfig {
            acquisition: AcquisitionConfig {
                sample_rate_hz: 1_000_000,
                waveform_records: 4,
                frame_records: 8,
            },
            ..Default::default()
        }
    }

    async fn read_n(host: &mut tokio::io::DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        host.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_handshake_bytes() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut session = Session::from_stream(client, small_config()).unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Triggered);

        let configure = read_n(&mut device, CONFIGURE_BYTES).await;
        assert_eq!(
            Command::decode_configure(&configure).unwrap(),
            Command::Configure {
                sample_rate_hz: 1_000_000,
                payload_bytes: 64,
            }
        );

        let payload = read_n(&mut device, 64).await;
        let expected = waveform::generate(4);
        for (chunk, rec) in payload.chunks_exact(16).zip(&expected) {
            let raw: [u8; 16] = chunk.try_into().unwrap();
            assert_eq!(SampleRecord::from_le_bytes(&raw), *rec);
        }

        let trigger = read_n(&mut device, TRIGGER_BYTES).await;
        assert_eq!(trigger, 0x3000_0000u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_out_of_order_calls_rejected() {
        let (client, _device) = tokio::io::duplex(4096);
        let mut session = Session::from_stream(client, small_config()).unwrap();

        let err = session.trigger().await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidState {
                operation: "trigger",
                state: SessionState::Connected
            }
        ));
        assert!(session.upload(&waveform::generate(4)).await.is_err());
        assert!(session
            .run_monitor(StopSignal::never(), |_| {})
            .await
            .is_err());

        session.configure().await.unwrap();
        // Length must match what configure announced.
        assert!(session.upload(&waveform::generate(3)).await.is_err());
        assert_eq!(session.state(), SessionState::Configuring);
    }

    #[tokio::test]
    async fn test_write_failure_terminates() {
        let (client, device) = tokio::io::duplex(4096);
        drop(device);
        let mut session = Session::from_stream(client, small_config()).unwrap();

        let err = session.configure().await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::TransportWrite {
                stage: Stage::Configure,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_monitor_reports_each_burst() {
        let mut config = small_config();
        config.monitor = MonitorConfig {
            max_bursts: Some(2),
            ..Default::default()
        };
        let (client, mut device) = tokio::io::duplex(4096);
        let mut session = Session::from_stream(client, config).unwrap();
        session.start().await.unwrap();
        read_n(&mut device, CONFIGURE_BYTES + 64 + TRIGGER_BYTES).await;

        // Burst 0 is a ramp, burst 1 has a spike at record 5.
        let mut wire = Vec::new();
        for i in 0..8 {
            SampleRecord::new(i, 0).put(&mut wire);
        }
        for i in 0..8 {
            SampleRecord::new(if i == 5 { 5_000_000 } else { 0 }, 0).put(&mut wire);
        }
        device.write_all(&wire).await.unwrap();

        let mut reports = Vec::new();
        let summary = session
            .run_monitor(StopSignal::never(), |r| reports.push(*r))
            .await
            .unwrap();

        assert_eq!(summary.reason, StopReason::BurstLimit);
        assert_eq!(summary.bursts, 2);
        assert_eq!(summary.anomalies, 1);
        assert_eq!(summary.bytes_received, 256);
        assert_eq!(summary.max_dmax, 5_000_000);

        assert_eq!(reports.len(), 2);
        assert!(!reports[0].anomaly);
        assert_eq!(reports[0].dmax, 1);
        assert!(reports[1].anomaly);
        assert_eq!(reports[1].index, 5);
    }

    #[tokio::test]
    async fn test_monitor_partial_burst_is_fatal() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut session = Session::from_stream(client, small_config()).unwrap();
        session.start().await.unwrap();
        read_n(&mut device, CONFIGURE_BYTES + 64 + TRIGGER_BYTES).await;

        device.write_all(&[0u8; 100]).await.unwrap();
        drop(device);

        let mut calls = 0;
        let err = session
            .run_monitor(StopSignal::never(), |_| calls += 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::TransportRead {
                received: 100,
                expected: 128,
                ..
            }
        ));
        assert_eq!(calls, 0);
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_burst_callback_can_halt_monitor() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut session = Session::from_stream(client, small_config()).unwrap();
        session.start().await.unwrap();
        read_n(&mut device, CONFIGURE_BYTES + 64 + TRIGGER_BYTES).await;

        let mut wire = Vec::new();
        for _ in 0..3 {
            for i in 0..8 {
                SampleRecord::new(i, 0).put(&mut wire);
            }
        }
        device.write_all(&wire).await.unwrap();

        // No limits: only the callback can end this run.
        let summary = session
            .monitor_until(StopSignal::never(), |r| {
                if r.burst == 1 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();
        assert_eq!(summary.reason, StopReason::Halted);
        assert_eq!(summary.bursts, 2);
    }

    #[tokio::test]
    async fn test_connect_attempt_times_out() {
        let limit = Duration::from_millis(50);
        let err = connect_within("10.255.255.1:1001", limit, std::future::pending::<std::io::Result<()>>())
            .await
            .unwrap_err();
        match err {
            StreamError::ConnectTimeout { addr, timeout } => {
                assert_eq!(addr, "10.255.255.1:1001");
                assert_eq!(timeout, limit);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_allocation() {
        let mut config = small_config();
        config.acquisition.frame_records = 1 << 62;
        let (client, _device) = tokio::io::duplex(64);
        assert!(matches!(
            Session::from_stream(client, config),
            Err(StreamError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_monitor_stop_and_deadline() {
        let (client, mut device) = tokio::io::duplex(4096);
        let mut session = Session::from_stream(client, small_config()).unwrap();
        session.start().await.unwrap();
        read_n(&mut device, CONFIGURE_BYTES + 64 + TRIGGER_BYTES).await;

        let (handle, signal) = StopSignal::channel();
        handle.stop();
        let summary = session.run_monitor(signal, |_| {}).await.unwrap();
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(summary.bursts, 0);

        let mut config = small_config();
        config.monitor.run_for = Some(Duration::from_millis(20));
        let (client, mut device) = tokio::io::duplex(4096);
        let mut session = Session::from_stream(client, config).unwrap();
        session.start().await.unwrap();
        read_n(&mut device, CONFIGURE_BYTES + 64 + TRIGGER_BYTES).await;

        // Device stays silent; only the deadline can end the run.
        let summary = session
            .run_monitor(StopSignal::never(), |_| {})
            .await
            .unwrap();
        assert_eq!(summary.reason, StopReason::Deadline);
        drop(device);
    }
}
