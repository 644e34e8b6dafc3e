//! Stdio transport: newline-delimited JSON-RPC over stdin/stdout.
//!
//! A single implicit session serves the one logical client. Requests
//! dispatch concurrently; a dedicated writer task owns stdout so every
//! outbound frame is written as one atomic line, interleaved correctly
//! by request id.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{OutboundFrame, STDIO_READY_SENTINEL, decode_request};
use crate::server::dispatch::Dispatcher;
use crate::server::session::{ClientInfo, SessionRegistry};

/// Run the stdio loop until EOF or server shutdown.
///
/// # Errors
///
/// Returns an error when stdin fails or the readiness sentinel cannot be
/// written.
pub async fn run_stdio(
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{STDIO_READY_SENTINEL}\n").as_bytes())
        .await?;
    stdout.flush().await?;

    // The writer task serializes all outbound frames onto stdout.
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut line = frame.to_json();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                tracing::warn!("stdout closed, stopping writer");
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let session = registry.create(ClientInfo::default()).await;
    tracing::info!(session_id = %session.id, "stdio transport ready");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            () = cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read?,
        };
        if bytes_read == 0 {
            tracing::info!("stdin closed, shutting down stdio transport");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Partial-line buffering is not used: a line either parses as a
        // complete JSON value or is discarded with a log entry.
        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unparseable stdio line");
                continue;
            }
        };
        let request = match decode_request(value) {
            Ok(request) => request,
            Err(error_response) => {
                let _ = tx.send(OutboundFrame::Response(*error_response));
                continue;
            }
        };

        session.touch().await;
        let dispatcher = Arc::clone(&dispatcher);
        let session = Arc::clone(&session);
        let tx = tx.clone();
        tokio::spawn(async move {
            dispatcher.dispatch(session, request, tx).await;
        });
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}
