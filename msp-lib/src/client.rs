//! Async driver for a [`LinkEngine`].
//!
//! [`LinkClient::spawn`] moves an engine onto a tokio task together with a
//! transport (serial port, TCP stream, anything `AsyncRead + AsyncWrite`).
//! The task is the engine's only owner, so inbound frames, timer expirations
//! and caller commands are handled one at a time to completion. Callers talk
//! to it through the cloneable [`LinkClient`] handle. The transport is framed
//! with [`MspCodec`].
//!
//! # Example
//!
//! ```ignore
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:5761").await?;
//! let (client, task) = LinkClient::spawn(stream, LinkConfig::default());
//! let api_version = client.request(1, &[]).await?;
//! client.shutdown().await;
//! task.await??;
//! ```

use crate::bus::SubscriptionId;
use crate::codec::MspCodec;
use crate::config::LinkConfig;
use crate::dispatcher::{Completion, Request};
use crate::error::LinkError;
use crate::frame::{Frame, Response};
use crate::link::{LinkEngine, LinkStats};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};

enum Command {
    Send {
        request: Request,
        completion: Completion,
        sent: Option<oneshot::Sender<()>>,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Subscribe {
        reply: oneshot::Sender<(SubscriptionId, mpsc::UnboundedReceiver<Frame>)>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<LinkStats>,
    },
    Reset,
    SetOffline(bool),
    Shutdown,
}

/// Handle to a running link task.
#[derive(Clone, Debug)]
pub struct LinkClient {
    commands: mpsc::Sender<Command>,
}

impl LinkClient {
    /// Start driving `io` on a new task.
    pub fn spawn<T>(io: T, config: LinkConfig) -> (Self, JoinHandle<Result<(), LinkError>>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let read_buffer_size = config.read_buffer_size.max(1);
        let engine = LinkEngine::new(config);
        let task = tokio::spawn(run(io, engine, rx, read_buffer_size));
        (Self { commands: tx }, task)
    }

    async fn command(&self, command: Command) -> Result<(), LinkError> {
        self.commands
            .send(command)
            .await
            .map_err(|mpsc::error::SendError(command)| {
                refuse(command);
                LinkError::Closed
            })
    }

    /// Queue a request whose response is delivered through `completion`.
    ///
    /// Returns false when the link refused it, including after the link task
    /// has stopped; `completion` then receives `None`.
    pub async fn send(&self, request: Request, completion: Completion) -> bool {
        self.send_with_sent(request, completion, None).await
    }

    /// Like [`LinkClient::send`], also signalling `sent` once the frame has
    /// been written to the transport.
    pub async fn send_with_sent(
        &self,
        request: Request,
        completion: Completion,
        sent: Option<oneshot::Sender<()>>,
    ) -> bool {
        matches!(self.submit(request, completion, sent).await, Ok(()))
    }

    async fn submit(
        &self,
        request: Request,
        completion: Completion,
        sent: Option<oneshot::Sender<()>>,
    ) -> Result<(), LinkError> {
        let (reply, accepted) = oneshot::channel();
        self.command(Command::Send {
            request,
            completion,
            sent,
            reply,
        })
        .await?;
        accepted.await.map_err(|_| LinkError::Closed)?
    }

    /// Send a request and wait for its matching response.
    pub async fn request(&self, code: u16, payload: &[u8]) -> Result<Response, LinkError> {
        self.request_with(Request::new(code).with_payload(Bytes::copy_from_slice(payload)))
            .await
    }

    /// Like [`LinkClient::request`] for a prepared [`Request`].
    ///
    /// `Cancelled` covers every way the request can end without a response:
    /// a `reset()`, the link going down, and a reply that failed its checksum
    /// when `invoke_on_crc_error` is not set.
    pub async fn request_with(&self, request: Request) -> Result<Response, LinkError> {
        let code = request.code;
        let (completion, response) = oneshot::channel();
        self.submit(request, completion, None).await?;
        match response.await {
            Ok(Some(response)) => Ok(response),
            Ok(None) | Err(_) => Err(LinkError::Cancelled { code }),
        }
    }

    /// Receive every decoded frame from now on.
    pub async fn subscribe(&self) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Frame>), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Subscribe { reply }).await?;
        rx.await.map_err(|_| LinkError::Closed)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Unsubscribe { id, reply }).await?;
        rx.await.map_err(|_| LinkError::Closed)
    }

    pub async fn stats(&self) -> Result<LinkStats, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Stats { reply }).await?;
        rx.await.map_err(|_| LinkError::Closed)
    }

    /// Drop any partial frame and every pending request.
    pub async fn reset(&self) -> Result<(), LinkError> {
        self.command(Command::Reset).await
    }

    pub async fn set_offline(&self, offline: bool) -> Result<(), LinkError> {
        self.command(Command::SetOffline(offline)).await
    }

    /// Ask the task to stop. Pending requests are dropped.
    pub async fn shutdown(&self) {
        let _ = self.command(Command::Shutdown).await;
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Answer a command the link task will never handle.
fn refuse(command: Command) {
    if let Command::Send {
        completion, reply, ..
    } = command
    {
        let _ = completion.send(None);
        let _ = reply.send(Err(LinkError::Closed));
    }
}

type FrameSink<T> = FramedWrite<WriteHalf<T>, MspCodec>;

async fn run<T>(
    io: T,
    mut engine: LinkEngine,
    mut commands: mpsc::Receiver<Command>,
    read_buffer_size: usize,
) -> Result<(), LinkError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(io);
    let mut frames = FramedRead::with_capacity(reader, MspCodec::new(), read_buffer_size);
    let mut sink = FramedWrite::new(writer, MspCodec::new());
    engine.connect();

    let result = loop {
        if let Err(e) = flush(&mut engine, &mut sink).await {
            break Err(e);
        }

        let deadline = engine.next_deadline();
        let timer = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(frame)) => engine.receive(&frame, now()),
                Some(Err(e)) => {
                    error!(%e, "transport read failed");
                    break Err(e);
                }
                None => {
                    info!("transport closed");
                    break Ok(());
                }
            },
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break Ok(()),
                Some(Command::Reset) => {
                    engine.reset();
                    frames.decoder_mut().reset();
                }
                Some(command) => handle_command(&mut engine, command),
            },
            _ = timer => engine.poll_timeouts(now()),
        }
    };

    // commands queued behind the exit are refused, not dropped
    commands.close();
    while let Ok(command) = commands.try_recv() {
        refuse(command);
    }
    engine.disconnect();
    result
}

fn handle_command(engine: &mut LinkEngine, command: Command) {
    match command {
        Command::Send {
            request,
            completion,
            sent,
            reply,
        } => {
            let outcome = match engine.try_send(request, completion, sent, now()) {
                Ok(()) => Ok(()),
                Err((err, completion)) => {
                    debug!(%err, "request refused");
                    let _ = completion.send(None);
                    Err(err)
                }
            };
            let _ = reply.send(outcome);
        }
        Command::Subscribe { reply } => {
            let _ = reply.send(engine.subscribe_channel());
        }
        Command::Unsubscribe { id, reply } => {
            let _ = reply.send(engine.unsubscribe(id));
        }
        Command::Stats { reply } => {
            let _ = reply.send(engine.stats());
        }
        Command::Reset => engine.reset(),
        Command::SetOffline(offline) => engine.set_offline(offline),
        Command::Shutdown => {}
    }
}

async fn flush<T>(engine: &mut LinkEngine, sink: &mut FrameSink<T>) -> Result<(), LinkError>
where
    T: AsyncWrite,
{
    while let Some(transmit) = engine.poll_transmit() {
        let written = sink.send(transmit.bytes.clone()).await;
        debug!(
            code = transmit.code,
            len = transmit.bytes.len(),
            kind = ?transmit.kind,
            "frame written"
        );
        match written {
            Ok(()) => engine.on_transmitted(transmit, true, now()),
            Err(e) => {
                engine.on_transmitted(transmit, false, now());
                error!(%e, "transport write failed");
                return Err(e);
            }
        }
    }
    Ok(())
}
