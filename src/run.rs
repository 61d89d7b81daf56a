//! Application run loop: connect, start streaming, monitor.

use crate::config::AppConfig;
use anyhow::{anyhow, Context, Result};
use daq_driver_red_pitaya::{MockRadar, MonitorSummary, Session, StopSignal, StreamError};
use std::future::Future;
use std::io::Write;
use std::ops::ControlFlow;

/// Run one monitoring session to completion.
///
/// Each anomalous burst writes its `dmax` as one line to `out`; a failed
/// write ends the run with an error. `stop` is honored from the start, so an
/// interrupt during connect or upload is an error too. Returns `Ok` only when
/// `stop` fires during monitoring or a configured limit is reached.
pub async fn run<W: Write>(
    config: &AppConfig,
    mut stop: StopSignal,
    out: &mut W,
) -> Result<MonitorSummary> {
    config.validate()?;
    let mut session_config = config.session_config();

    let mock_task = if config.device.mock {
        let (addr, task) = MockRadar::new(config.mock.clone())
            .spawn_listener("127.0.0.1:0")
            .await?;
        tracing::info!("Mock mode: redirecting device to {}", addr);
        session_config.device.host = addr.ip().to_string();
        session_config.device.port = addr.port();
        Some(task)
    } else {
        None
    };

    let address = session_config.device.address();
    let mut session = interruptible(&mut stop, "connect", Session::connect(session_config))
        .await?
        .with_context(|| format!("Failed to connect to device at {}", address))?;
    interruptible(&mut stop, "stream start", session.start())
        .await?
        .map_err(|e| describe(e, "Failed to configure and trigger streaming"))?;

    let mut write_error = None;
    let summary = session
        .monitor_until(stop, |report| {
            if !report.anomaly {
                return ControlFlow::Continue(());
            }
            match writeln!(out, "{}", report.dmax).and_then(|_| out.flush()) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    write_error = Some(e);
                    ControlFlow::Break(())
                }
            }
        })
        .await
        .map_err(|e| describe(e, "Continuity monitor stopped"))?;
    if let Some(e) = write_error {
        return Err(e).context("Failed to write anomaly report");
    }

    tracing::info!(
        bursts = summary.bursts,
        anomalies = summary.anomalies,
        max_dmax = summary.max_dmax,
        "Monitor stopped: {:?}",
        summary.reason
    );

    if let Some(task) = mock_task {
        // The mock streams until its peer disconnects
        drop(session);
        match task.await {
            Ok(Ok(stats)) => tracing::debug!("Mock device finished: {:?}", stats),
            Ok(Err(e)) => tracing::warn!("Mock device failed: {:#}", e),
            Err(e) => tracing::warn!("Mock device task panicked: {}", e),
        }
    }

    Ok(summary)
}

/// Race a pre-monitor stage against `stop`.
async fn interruptible<F: Future>(stop: &mut StopSignal, stage: &str, fut: F) -> Result<F::Output> {
    if stop.is_stopped() {
        return Err(anyhow!("Interrupted before {}", stage));
    }
    tokio::select! {
        biased;
        _ = stop.stopped() => Err(anyhow!("Interrupted during {}", stage)),
        out = fut => Ok(out),
    }
}

fn describe(err: StreamError, what: &str) -> anyhow::Error {
    if err.is_transport() {
        anyhow::Error::new(err).context(format!("{} (device link lost)", what))
    } else {
        anyhow::Error::new(err).context(what.to_string())
    }
}
