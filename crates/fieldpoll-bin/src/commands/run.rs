// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::error::BinResult;
use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::{default_registry, ResultLine, Supervisor};

use super::{load_config, setup_logging};

const LINE_BUFFER: usize = 256;

/// Polls every configured device until SIGINT/SIGTERM.
///
/// Each cycle result is written to stdout as one JSON line.
pub async fn run(cli: &Cli) -> BinResult<()> {
    let config = load_config(cli)?;
    setup_logging(cli, &config)?;
    info!(
        config = %cli.config.display(),
        devices = config.devices.len(),
        variables = config.variable_count(),
        "Starting fieldpoll"
    );

    let (tx, mut rx) = mpsc::channel::<ResultLine>(LINE_BUFFER);
    let mut supervisor = Supervisor::new(default_registry());
    if let Err(e) = supervisor.spawn_all(&config.devices, tx) {
        supervisor.shutdown().await;
        return Err(e);
    }

    let coordinator = ShutdownCoordinator::new();
    let mut stop = coordinator.subscribe();
    let waiter = coordinator.clone();
    let signals = tokio::spawn(async move {
        if let Err(e) = waiter.wait_for_shutdown().await {
            error!(error = %e, "Failed to install signal handlers");
            waiter.initiate_shutdown();
        }
    });

    let mut out = BufWriter::new(tokio::io::stdout());
    let outcome = loop {
        tokio::select! {
            _ = stop.recv() => break Ok(()),
            line = rx.recv() => match line {
                Some(line) => {
                    if let Err(e) = write_line(&mut out, &line).await {
                        break Err(e);
                    }
                }
                None => {
                    warn!("Every result stream has closed");
                    break Ok(());
                }
            },
        }
    };

    coordinator.initiate_shutdown();
    let _ = signals.await;
    drop(rx);
    supervisor.shutdown().await;
    outcome
}

async fn write_line<W>(out: &mut W, line: &ResultLine) -> BinResult<()>
where
    W: AsyncWrite + Unpin,
{
    match line.to_json() {
        Ok(json) => {
            out.write_all(json.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
        Err(e) => warn!(device = %line.device, error = %e, "Dropped unserializable result"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpoll_core::DeviceId;

    #[tokio::test]
    async fn test_write_line_is_newline_terminated() {
        let line = ResultLine {
            timestamp: "2025-03-01T08:30:00.000Z".to_string(),
            device: DeviceId::from("press-1"),
            cycle: 3,
            duration_ms: 4,
            values: Vec::new(),
            errors: Vec::new(),
        };
        let mut out = Vec::new();
        write_line(&mut out, &line).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("{\"timestamp\":\"2025-03-01T08:30:00.000Z\",\"device\":\"press-1\""));
    }
}
