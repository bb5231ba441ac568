//! Native messaging host: the background service over stdin/stdout.
//!
//! Every message is a 4-byte length in native byte order followed by that
//! many bytes of UTF-8 JSON.

use std::sync::Arc;

use anyhow::Context;
use jobscout_core::{BackgroundResponse, TabId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::background::{Background, BackgroundReply, BackgroundRequest, ContentCommand, RuntimeEvent, TabCommand};
use crate::navigation::NavigationEvent;

/// Largest message the browser may send to a host.
pub const MAX_INCOMING: usize = 64 * 1024 * 1024;
/// Largest message a host may send to the browser.
pub const MAX_OUTGOING: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the extension sends to the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostInput {
    Request {
        id: u64,
        #[serde(default)]
        tab_id: Option<TabId>,
        request: BackgroundRequest,
    },
    HistoryStateUpdated(NavigationEvent),
    TabRemoved { tab_id: TabId },
}

/// What the host sends back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostOutput {
    Reply { id: u64, reply: BackgroundReply },
    TabCommand { tab_id: TabId, command: ContentCommand },
    Event { event: RuntimeEvent },
    Error { message: String },
}

impl From<TabCommand> for HostOutput {
    fn from(command: TabCommand) -> Self {
        HostOutput::TabCommand {
            tab_id: command.tab_id,
            command: command.command,
        }
    }
}

/// Read one frame. `Ok(None)` on a clean end of input.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_INCOMING {
        return Err(FrameError::TooLarge { len, max: MAX_INCOMING });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Serialize `message` and write it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_OUTGOING {
        return Err(FrameError::TooLarge {
            len: body.len(),
            max: MAX_OUTGOING,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        len: body.len(),
        max: MAX_OUTGOING,
    })?;

    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Write `output`. A reply too large for the browser is replaced by a
/// failure for the same request; anything else too large is dropped.
async fn write_output<W: AsyncWrite + Unpin>(writer: &mut W, output: &HostOutput) -> anyhow::Result<()> {
    match write_frame(writer, output).await {
        Ok(()) => Ok(()),
        Err(FrameError::TooLarge { len, max }) => {
            tracing::warn!(len, max, "outgoing message exceeds the size limit");
            let HostOutput::Reply { id, .. } = output else {
                return Ok(());
            };
            let failure = HostOutput::Reply {
                id: *id,
                reply: BackgroundReply::Ack(BackgroundResponse::err(format!(
                    "Reply of {len} bytes exceeds the {max} byte message limit."
                ))),
            };
            write_frame(writer, &failure).await.context("failed to write reply")
        }
        Err(e) => Err(e).context("failed to write to the extension"),
    }
}

async fn read_inputs<R>(mut reader: R, inputs: mpsc::Sender<Result<HostInput, FrameError>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let decoded = match read_frame(&mut reader).await {
            Ok(Some(body)) => serde_json::from_slice::<HostInput>(&body).map_err(FrameError::from),
            Ok(None) => break,
            Err(e) => {
                let _ = inputs.send(Err(e)).await;
                break;
            }
        };
        if inputs.send(decoded).await.is_err() {
            break;
        }
    }
}

fn dispatch(
    background: &Arc<Background>,
    input: HostInput,
    outputs: &mpsc::UnboundedSender<HostOutput>,
    requests: &mut JoinSet<()>,
) {
    match input {
        HostInput::Request { id, tab_id, request } => {
            let background = background.clone();
            let outputs = outputs.clone();
            requests.spawn(async move {
                let reply = background.handle(tab_id, request).await;
                let _ = outputs.send(HostOutput::Reply { id, reply });
            });
        }
        HostInput::HistoryStateUpdated(event) => {
            background.on_history_state_updated(&event);
        }
        HostInput::TabRemoved { tab_id } => background.on_tab_removed(tab_id),
    }
}

/// Serve `background` until the input ends.
///
/// Requests are handled concurrently; navigation events are applied in
/// arrival order. Tab commands and runtime events are forwarded as they occur.
pub async fn serve<R, W>(
    background: Arc<Background>,
    reader: R,
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<TabCommand>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (input_tx, mut inputs) = mpsc::channel(32);
    let reader_task = tokio::spawn(read_inputs(reader, input_tx));
    let (output_tx, mut outputs) = mpsc::unbounded_channel();
    let mut events = background.subscribe_events();
    let mut requests = JoinSet::new();

    tracing::info!("native messaging host started");

    loop {
        tokio::select! {
            input = inputs.recv() => match input {
                Some(Ok(input)) => dispatch(&background, input, &output_tx, &mut requests),
                Some(Err(FrameError::Json(e))) => {
                    tracing::warn!(error = %e, "discarding malformed message");
                    let message = HostOutput::Error { message: format!("malformed message: {e}") };
                    write_output(&mut writer, &message).await?;
                }
                Some(Err(e)) => return Err(e).context("failed to read from the extension"),
                None => break,
            },
            Some(command) = commands.recv() => {
                write_output(&mut writer, &HostOutput::from(command)).await?;
            }
            event = events.recv() => match event {
                Ok(event) => write_output(&mut writer, &HostOutput::Event { event }).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "runtime events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
            Some(output) = outputs.recv() => write_output(&mut writer, &output).await?,
            Some(result) = requests.join_next() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "request task failed");
                }
            }
        }
    }

    while let Some(result) = requests.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "request task failed");
        }
    }
    drop(output_tx);
    while let Some(output) = outputs.recv().await {
        write_output(&mut writer, &output).await?;
    }
    while let Ok(command) = commands.try_recv() {
        write_output(&mut writer, &HostOutput::from(command)).await?;
    }
    let _ = reader_task.await;

    tracing::info!("native messaging host stopped");
    Ok(())
}
