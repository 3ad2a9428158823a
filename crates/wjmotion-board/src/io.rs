//! Command dispatcher: the single task that owns the transport.
//!
//! Callers hand [`Command`]s to a [`Dispatcher`]; one spawned task writes
//! them to the board one at a time and routes each reply back through a
//! oneshot channel. Two queues feed the task:
//!
//! - the priority lane, drained first (emergency stop, close)
//! - the normal lane, served in arrival order
//!
//! The task runs each command through a small state machine:
//! `Idle -> AwaitingResponse -> (Retrying -> AwaitingResponse)* -> done`,
//! ending in a reply frame or `Failed`. Timeouts are retried up to
//! `max_retries` times; a corrupt reply is retried once; a transport error
//! is never retried and faults the connection.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use wjmotion_core::{Error, LinkState, MotionEvent, Result, Transport};
use wjmotion_protocol::frame::{Decoded, Frame, FrameDecoder};
use wjmotion_protocol::Command;

/// Default time to wait for each reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(200);

/// Default number of retries after a reply timeout.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Read timeout of the idle reader between commands.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Time to wait for a reply to one write.
    pub command_timeout: Duration,
    /// Rewrites after a timeout. A command is written at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Where an in-flight command stands. Used in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingResponse,
    Retrying,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::AwaitingResponse => "awaiting-response",
            Phase::Retrying => "retrying",
            Phase::Failed => "failed",
        })
    }
}

/// A request to the IO task.
pub(crate) enum Request {
    /// Write a command and wait for its reply.
    Command {
        command: Command,
        timeout: Duration,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<Frame>>,
    },
    /// Write a command without waiting for a reply.
    NoReply {
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the transport and stop; hands back the closed transport.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

impl Request {
    fn fail(self, err: impl Fn() -> Error) {
        match self {
            Request::Command { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            Request::NoReply { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            Request::Shutdown { .. } => {}
        }
    }
}

/// A queued command's reply, which can be awaited or cancelled.
///
/// Dropping a `PendingReply` (for example when the awaiting future is
/// dropped) cancels the command if it has not reached the transport yet.
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Frame>>,
    token: CancellationToken,
    guard: DropGuard,
}

impl PendingReply {
    /// Withdraw the command. Has no effect once it is in flight; an
    /// in-flight command can only time out.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the reply frame.
    pub async fn wait(self) -> Result<Frame> {
        let PendingReply { rx, guard, .. } = self;
        let result = rx.await.map_err(|_| Error::NotConnected)?;
        let _ = guard.disarm();
        result
    }
}

/// Handle to the IO task.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Dispatcher {
    rt_tx: mpsc::UnboundedSender<Request>,
    bg_tx: mpsc::UnboundedSender<Request>,
    cancel: CancellationToken,
    state: watch::Receiver<LinkState>,
    config: DispatcherConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the IO task on the current Tokio runtime.
    pub fn spawn(
        transport: Box<dyn Transport>,
        config: DispatcherConfig,
        event_tx: broadcast::Sender<MotionEvent>,
    ) -> Self {
        let (rt_tx, rt_rx) = mpsc::unbounded_channel::<Request>();
        let (bg_tx, bg_rx) = mpsc::unbounded_channel::<Request>();
        let (state_tx, state) = watch::channel(LinkState::Open);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(io_loop(
            transport,
            config.clone(),
            event_tx,
            state_tx,
            rt_rx,
            bg_rx,
            cancel.clone(),
        ));

        Dispatcher {
            rt_tx,
            bg_tx,
            cancel,
            state,
            config,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_watch(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            LinkState::Open => Ok(()),
            LinkState::Closed | LinkState::Faulted => Err(Error::NotConnected),
        }
    }

    fn lane(&self, command: &Command) -> &mpsc::UnboundedSender<Request> {
        if command.opcode().is_priority() {
            &self.rt_tx
        } else {
            &self.bg_tx
        }
    }

    /// Queue a command and return a handle to its reply.
    ///
    /// Enqueueing never waits on other callers. Replies complete in queue
    /// order.
    pub fn submit(&self, command: Command, timeout: Duration) -> Result<PendingReply> {
        self.ensure_open()?;
        if !command.opcode().expects_reply() {
            return Err(Error::Validation(format!(
                "{} is never answered; use send_no_reply",
                command.opcode()
            )));
        }
        let (reply, rx) = oneshot::channel();
        let token = CancellationToken::new();
        let lane = self.lane(&command);
        lane.send(Request::Command {
            command,
            timeout,
            cancel: token.clone(),
            reply,
        })
        .map_err(|_| Error::NotConnected)?;
        Ok(PendingReply {
            rx,
            guard: token.clone().drop_guard(),
            token,
        })
    }

    /// Send a command and wait for its reply frame.
    pub async fn send(&self, command: Command, timeout: Duration) -> Result<Frame> {
        self.submit(command, timeout)?.wait().await
    }

    /// Send a command with the configured timeout.
    pub async fn request(&self, command: Command) -> Result<Frame> {
        self.send(command, self.config.command_timeout).await
    }

    /// Write a command without waiting for any reply.
    ///
    /// Resolves once the bytes are on the wire. Priority commands overtake
    /// everything still queued on the normal lane.
    pub async fn send_no_reply(&self, command: Command) -> Result<()> {
        self.ensure_open()?;
        let (reply, rx) = oneshot::channel();
        let lane = self.lane(&command);
        lane.send(Request::NoReply { command, reply })
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Close the transport and stop the IO task.
    ///
    /// Travels on the priority lane, so it runs as soon as the in-flight
    /// command (if any) resolves. Commands still queued fail with
    /// [`Error::NotConnected`]. Returns the closed transport.
    pub async fn shutdown(&self) -> Result<Box<dyn Transport>> {
        let (reply, rx) = oneshot::channel();
        self.rt_tx
            .send(Request::Shutdown { reply })
            .map_err(|_| Error::NotConnected)?;
        let transport = rx.await.map_err(|_| Error::NotConnected)?;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(transport)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// IO loop
// ---------------------------------------------------------------------------

/// The IO loop. Runs as a spawned Tokio task.
///
/// `tokio::select! { biased; }` orders the work:
/// 1. cancellation
/// 2. the priority lane
/// 3. the normal lane
/// 4. idle reading, which drains late or unsolicited frames
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: DispatcherConfig,
    event_tx: broadcast::Sender<MotionEvent>,
    state_tx: watch::Sender<LinkState>,
    mut rt_rx: mpsc::UnboundedReceiver<Request>,
    mut bg_rx: mpsc::UnboundedReceiver<Request>,
    cancel: CancellationToken,
) {
    let mut decoder = FrameDecoder::new();

    loop {
        let req = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            req = rt_rx.recv() => req,
            req = bg_rx.recv() => req,

            fault = idle_read(&mut *transport, &mut decoder) => {
                if let Err(e) = fault {
                    fault_connection(&mut *transport, &e, &state_tx, &event_tx).await;
                    break;
                }
                continue;
            }
        };

        let req = match req {
            Some(Request::Shutdown { reply }) => {
                debug!("IO task shutdown requested");
                if let Err(e) = transport.close().await {
                    tracing::warn!(error = %e, "error while closing transport");
                }
                let _ = state_tx.send(LinkState::Closed);
                let _ = event_tx.send(MotionEvent::Disconnected);
                let _ = reply.send(transport);
                break;
            }
            Some(req) => req,
            None => {
                debug!("dispatcher dropped, exiting IO task");
                break;
            }
        };

        if let Err(e) = handle_request(req, &mut *transport, &mut decoder, &config).await {
            fault_connection(&mut *transport, &e, &state_tx, &event_tx).await;
            break;
        }
    }

    // Anything still queued can never be served.
    rt_rx.close();
    bg_rx.close();
    while let Ok(req) = rt_rx.try_recv() {
        req.fail(|| Error::NotConnected);
    }
    while let Ok(req) = bg_rx.try_recv() {
        req.fail(|| Error::NotConnected);
    }
}

async fn fault_connection(
    transport: &mut dyn Transport,
    error: &Error,
    state_tx: &watch::Sender<LinkState>,
    event_tx: &broadcast::Sender<MotionEvent>,
) {
    tracing::error!(error = %error, "transport failed, connection faulted");
    let _ = transport.close().await;
    let _ = state_tx.send(LinkState::Faulted);
    let _ = event_tx.send(MotionEvent::Disconnected);
}

/// Execute one command request.
///
/// Returns `Err` for a fatal transport error, after the caller has been
/// told about it.
async fn handle_request(
    req: Request,
    transport: &mut dyn Transport,
    decoder: &mut FrameDecoder,
    config: &DispatcherConfig,
) -> Result<()> {
    let fatal = match req {
        Request::Command {
            command,
            timeout,
            cancel,
            reply,
        } => {
            if cancel.is_cancelled() {
                debug!(opcode = %command.opcode(), "skipping cancelled command");
                let _ = reply.send(Err(Error::Cancelled));
                return Ok(());
            }
            let result =
                execute_command(transport, decoder, &command, timeout, config.max_retries).await;
            let fatal = fatal_copy(result.as_ref().err());
            let _ = reply.send(result);
            fatal
        }
        Request::NoReply { command, reply } => {
            debug!(opcode = %command.opcode(), "sending without reply");
            decoder.clear();
            let result = transport.send(&command.encode()).await;
            let fatal = fatal_copy(result.as_ref().err());
            let _ = reply.send(result);
            fatal
        }
        Request::Shutdown { .. } => unreachable!("Shutdown handled in io_loop"),
    };
    fatal.map_or(Ok(()), Err)
}

/// A copy of `error` for the fault path, if it is fatal.
fn fatal_copy(error: Option<&Error>) -> Option<Error> {
    error
        .filter(|e| e.is_fatal())
        .map(|e| Error::Transport(e.to_string()))
}

/// Write a command and wait for the matching reply, retrying per policy.
async fn execute_command(
    transport: &mut dyn Transport,
    decoder: &mut FrameDecoder,
    command: &Command,
    timeout: Duration,
    max_retries: u32,
) -> Result<Frame> {
    let bytes = command.encode();
    let opcode = command.opcode();
    let target = command.target().to_byte();
    let mut timeouts = 0u32;
    let mut corrupt = 0u32;
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            debug!(%opcode, attempt, phase = %Phase::Retrying, "retrying command");
            tokio::time::sleep(Duration::from_millis(20 * attempt as u64)).await;
        }

        // Bytes left over from an earlier exchange cannot answer this write.
        decoder.clear();
        transport.send(&bytes).await?;
        debug!(%opcode, attempt, phase = %Phase::AwaitingResponse, "command written");

        match await_reply(transport, decoder, opcode as u8, target, timeout).await {
            Ok(frame) if frame.is_frame_error() => {
                corrupt += 1;
                debug!(%opcode, "board reports a corrupt command frame");
                if corrupt > 1 {
                    debug!(%opcode, phase = %Phase::Failed, "corrupt exchange persisted");
                    return Err(Error::Protocol(format!(
                        "board could not decode {opcode} frame"
                    )));
                }
            }
            Ok(frame) if frame.is_rejected() => {
                debug!(%opcode, status = frame.status, phase = %Phase::Failed, "command refused");
                return Err(Error::Protocol(format!(
                    "board refused {opcode} with status 0x{:02X}",
                    frame.status
                )));
            }
            Ok(frame) => return Ok(frame),
            Err(Error::Timeout) => {
                timeouts += 1;
                if timeouts > max_retries {
                    debug!(%opcode, writes = attempt + 1, phase = %Phase::Failed, "no reply");
                    return Err(Error::Timeout);
                }
            }
            Err(Error::Protocol(reason)) => {
                corrupt += 1;
                if corrupt > 1 {
                    debug!(%opcode, phase = %Phase::Failed, "corrupt reply persisted");
                    return Err(Error::Protocol(reason));
                }
                debug!(%opcode, %reason, "corrupt reply");
            }
            Err(e) => return Err(e),
        }
        attempt += 1;
    }
}

/// Read until a frame with `opcode` and `target` arrives or `timeout`
/// elapses.
///
/// Anything else is skipped: late acknowledgements of fire-and-forget
/// commands, and late replies to an earlier command that timed out. A corrupt frame fails the wait unless a matching
/// frame is already buffered behind it.
async fn await_reply(
    transport: &mut dyn Transport,
    decoder: &mut FrameDecoder,
    opcode: u8,
    target: u8,
    timeout: Duration,
) -> Result<Frame> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 256];

    loop {
        let mut malformed = None;
        while let Some(item) = decoder.decode_next() {
            match item {
                Decoded::Frame(frame) if frame.opcode == opcode && frame.target == target => {
                    return Ok(frame);
                }
                Decoded::Frame(frame) => {
                    debug!(
                        expected = opcode,
                        expected_target = target,
                        got = frame.opcode,
                        got_target = frame.target,
                        "skipping unrelated frame"
                    );
                }
                Decoded::Malformed(reason) => malformed = Some(reason),
            }
        }
        if let Some(reason) = malformed {
            return Err(Error::Protocol(format!("malformed reply: {reason}")));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        let n = transport.receive(&mut buf, remaining).await?;
        decoder.push(&buf[..n]);
    }
}

/// Read and discard whatever the board sends between commands.
///
/// Returns `Err` only for fatal transport errors.
async fn idle_read(transport: &mut dyn Transport, decoder: &mut FrameDecoder) -> Result<()> {
    let mut buf = [0u8; 256];
    match transport.receive(&mut buf, IDLE_POLL).await {
        Ok(n) => {
            decoder.push(&buf[..n]);
            while let Some(item) = decoder.decode_next() {
                match item {
                    Decoded::Frame(frame) => {
                        debug!(opcode = frame.opcode, "discarding unsolicited frame");
                    }
                    Decoded::Malformed(reason) => {
                        tracing::warn!(%reason, "discarding corrupt idle data");
                    }
                }
            }
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(_) => {
            // Timeout, or a transport that refuses reads; yield so the loop
            // can pick up commands.
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
