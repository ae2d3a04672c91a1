//! Link dispatcher: the single driver of all protocol activity.
//!
//! One loop reads frames off the link and routes them: images to the
//! store, state changes to the supervisor, gestures out to whoever is
//! listening. The same loop serializes activations arriving from the
//! remote front-end (via the command queue) and runs the periodic renderer
//! liveness sweep, so `activate` is never called from two places at once.
//!
//! The loop owns its read buffer rather than wrapping the link in a framed
//! stream: a framing error must not end the stream, it must discard the
//! buffered bytes and hunt for the next control byte. Only link closure or
//! a shutdown request ends the loop, and both run the full pool teardown.

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, FramedWrite};

use crate::link::codec::LinkCodec;
use crate::link::frame::{Frame, FramingError, SwipeSet};
use crate::link::transport::LinkConfig;
use crate::store::ImageStore;
use crate::supervisor::{ActivateError, DisplaySupervisor};

/// Capacity reserved ahead of every link read.
const READ_CHUNK: usize = 4096;

/// Requests from the remote front-end, funneled through the dispatcher so
/// activations stay serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherCommand {
    Activate(String),
}

/// Gesture traffic handed to an external consumer. The dispatcher assigns
/// no meaning to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardedEvent {
    Swipe(SwipeSet),
    Gesture(Bytes),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    /// The link reached EOF or failed; the pool has already been torn down.
    #[error("transport closed")]
    TransportClosed,
}

/// Handle for nudging a running dispatcher from outside.
pub struct DispatcherHandle {
    commands: mpsc::Sender<DispatcherCommand>,
    shutdown: watch::Sender<bool>,
}

impl DispatcherHandle {
    /// Queue an activation request. Returns false if the dispatcher is gone.
    pub async fn activate(&self, name: impl Into<String>) -> bool {
        self.commands
            .send(DispatcherCommand::Activate(name.into()))
            .await
            .is_ok()
    }

    /// Ask the dispatcher to stop and tear the pool down.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

enum LoopExit {
    Requested,
    Closed,
}

/// The dispatcher loop state. Built with [`Dispatcher::new`], driven with
/// [`Dispatcher::run`].
pub struct Dispatcher<R> {
    link: R,
    codec: LinkCodec,
    buffer: BytesMut,
    supervisor: DisplaySupervisor,
    store: ImageStore,
    config: LinkConfig,
    commands: mpsc::Receiver<DispatcherCommand>,
    events: mpsc::Sender<ForwardedEvent>,
    shutdown: watch::Receiver<bool>,
}

impl<R: AsyncRead + Unpin> Dispatcher<R> {
    pub fn new(
        link: R,
        supervisor: DisplaySupervisor,
        store: ImageStore,
        config: LinkConfig,
        events: mpsc::Sender<ForwardedEvent>,
    ) -> (Self, DispatcherHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Self {
            link,
            codec: LinkCodec::new(),
            buffer: BytesMut::with_capacity(READ_CHUNK),
            supervisor,
            store,
            config,
            commands: command_rx,
            events,
            shutdown: shutdown_rx,
        };
        let handle = DispatcherHandle {
            commands: command_tx,
            shutdown: shutdown_tx,
        };
        (dispatcher, handle)
    }

    pub fn supervisor(&self) -> &DisplaySupervisor {
        &self.supervisor
    }

    /// Drive the loop until link closure or a shutdown request, then tear
    /// the renderer pool down. Frame handling is awaited inside the loop
    /// body, so a shutdown arriving mid-switch cannot cancel the pause
    /// step of an in-flight activation.
    pub async fn run(&mut self) -> Result<(), DispatcherError> {
        let mut liveness = tokio::time::interval(self.config.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so the sweep starts
        // one interval in.
        liveness.tick().await;

        let exit = loop {
            self.drain_buffered_frames().await;

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break LoopExit::Requested;
                    }
                }

                _ = liveness.tick() => {
                    self.supervisor.on_liveness_tick();
                }

                Some(command) = self.commands.recv() => {
                    match command {
                        DispatcherCommand::Activate(name) => self.handle_activate(&name),
                    }
                }

                read = read_more(&mut self.link, &mut self.buffer, &self.config) => {
                    match read {
                        // Quiet line. A partial frame this old will never
                        // complete; drop it and hunt for the next control
                        // byte.
                        ReadOutcome::TimedOut => {
                            if !self.buffer.is_empty() {
                                tracing::warn!(
                                    buffered = self.buffer.len(),
                                    "partial frame timed out; resynchronizing"
                                );
                                self.buffer.clear();
                            }
                        }
                        ReadOutcome::Data => {}
                        ReadOutcome::Eof => {
                            self.drain_at_eof().await;
                            tracing::error!("link closed");
                            break LoopExit::Closed;
                        }
                        ReadOutcome::Failed(error) => {
                            tracing::error!(%error, "link read failed");
                            break LoopExit::Closed;
                        }
                    }
                }
            }
        };

        self.supervisor.shutdown().await;
        match exit {
            LoopExit::Requested => Ok(()),
            LoopExit::Closed => Err(DispatcherError::TransportClosed),
        }
    }

    /// Decode and route every complete frame currently buffered. A framing
    /// error discards the buffer; decoding restarts at the next control
    /// byte the link sends.
    async fn drain_buffered_frames(&mut self) {
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => self.route(frame).await,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "framing error; resynchronizing");
                    self.buffer.clear();
                    break;
                }
            }
        }
    }

    /// Flush whatever the codec can still make of the buffer once the link
    /// has ended.
    async fn drain_at_eof(&mut self) {
        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(frame)) => self.route(frame).await,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "link ended mid-frame");
                    self.buffer.clear();
                    break;
                }
            }
        }
    }

    async fn route(&mut self, frame: Frame) {
        match frame {
            Frame::ImageTransfer { name, payload } => {
                match self.store.store(&name, &payload).await {
                    Ok(dir) => {
                        tracing::info!(
                            image = %name,
                            dir = %dir.display(),
                            bytes = payload.len(),
                            "image received"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(image = %name, %error, "failed to store image");
                    }
                }
            }
            Frame::StateChange { name } => self.handle_activate(&name),
            Frame::Swipe { directions } => {
                tracing::debug!(%directions, "swipe received");
                self.forward(ForwardedEvent::Swipe(directions));
            }
            Frame::Gesture { payload } => {
                tracing::debug!(bytes = payload.len(), "gesture received");
                self.forward(ForwardedEvent::Gesture(payload));
            }
        }
    }

    fn handle_activate(&mut self, name: &str) {
        match self.supervisor.activate(name) {
            Ok(()) => {}
            Err(ActivateError::AlreadyActive(_)) => {
                tracing::debug!(animation = name, "already active");
            }
            Err(error) => {
                tracing::warn!(animation = name, %error, "activation rejected");
            }
        }
    }

    fn forward(&mut self, event: ForwardedEvent) {
        if let Err(error) = self.events.try_send(event) {
            tracing::debug!(%error, "gesture dropped; no consumer keeping up");
        }
    }
}

enum ReadOutcome {
    /// At least one byte arrived.
    Data,
    /// Nothing arrived within the link timeout.
    TimedOut,
    Eof,
    Failed(std::io::Error),
}

/// One timeout-bounded read off the link into the dispatch buffer.
async fn read_more<R: AsyncRead + Unpin>(
    link: &mut R,
    buffer: &mut BytesMut,
    config: &LinkConfig,
) -> ReadOutcome {
    buffer.reserve(READ_CHUNK);
    match tokio::time::timeout(config.read_timeout, link.read_buf(buffer)).await {
        Err(_elapsed) => ReadOutcome::TimedOut,
        Ok(Ok(0)) => ReadOutcome::Eof,
        Ok(Ok(_)) => ReadOutcome::Data,
        Ok(Err(error)) => ReadOutcome::Failed(error),
    }
}

/// Sender-role API for the peer that pushes images and state changes onto
/// the link.
pub struct LinkSender<W> {
    frames: FramedWrite<W, LinkCodec>,
}

impl<W: AsyncWrite + Unpin> LinkSender<W> {
    pub fn new(link: W) -> Self {
        Self {
            frames: FramedWrite::new(link, LinkCodec::new()),
        }
    }

    /// Push one image file.
    pub async fn send_image(
        &mut self,
        name: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), FramingError> {
        self.frames
            .send(Frame::ImageTransfer {
                name: name.into(),
                payload: payload.into(),
            })
            .await
    }

    /// Request an animation switch on the display side.
    pub async fn send_state_change(&mut self, name: impl Into<String>) -> Result<(), FramingError> {
        self.frames
            .send(Frame::StateChange { name: name.into() })
            .await
    }

    /// Report debounced swipe directions.
    pub async fn send_swipe(&mut self, directions: SwipeSet) -> Result<(), FramingError> {
        self.frames.send(Frame::Swipe { directions }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::{RecordingControl, fake_pool};
    use crate::supervisor::Phase;
    use std::time::Duration;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            read_timeout: Duration::from_millis(50),
            liveness_interval: Duration::from_secs(60),
        }
    }

    struct Rig {
        dispatcher: Dispatcher<tokio::io::DuplexStream>,
        handle: DispatcherHandle,
        sender: LinkSender<tokio::io::DuplexStream>,
        events: mpsc::Receiver<ForwardedEvent>,
        control: std::sync::Arc<RecordingControl>,
        _tmp: tempfile::TempDir,
    }

    fn rig(animations: &[&str]) -> Rig {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let control = RecordingControl::new();
        let mut supervisor =
            DisplaySupervisor::new(fake_pool(control.clone(), animations), "Idle");
        supervisor.initialize();

        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path().join("images"));

        let (events_tx, events_rx) = mpsc::channel(16);
        let (dispatcher, handle) =
            Dispatcher::new(near, supervisor, store, fast_config(), events_tx);
        Rig {
            dispatcher,
            handle,
            sender: LinkSender::new(far),
            events: events_rx,
            control,
            _tmp: tmp,
        }
    }

    /// Run the dispatcher while the driver closure feeds it, then request
    /// shutdown and hand the dispatcher back for inspection.
    async fn run_until_shutdown(
        mut rig: Rig,
        drive: impl AsyncFnOnce(
            &mut LinkSender<tokio::io::DuplexStream>,
            &DispatcherHandle,
            &mut mpsc::Receiver<ForwardedEvent>,
        ),
    ) -> (Result<(), DispatcherError>, Rig) {
        let result = {
            let driver = async {
                drive(&mut rig.sender, &rig.handle, &mut rig.events).await;
                rig.handle.trigger_shutdown();
            };
            let (result, ()) = tokio::join!(rig.dispatcher.run(), driver);
            result
        };
        (result, rig)
    }

    #[tokio::test]
    async fn image_frame_lands_in_store() {
        let rig = rig(&["Idle"]);
        let root = rig._tmp.path().join("images");

        let (result, _rig) = run_until_shutdown(rig, async |sender, _, _| {
            sender
                .send_image("wave3.png", &b"fake png"[..])
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await;

        assert!(result.is_ok());
        let written = std::fs::read(root.join("wave").join("wave3.png")).unwrap();
        assert_eq!(written, b"fake png");
    }

    #[tokio::test]
    async fn state_frame_switches_animation() {
        let rig = rig(&["Idle", "Speaking"]);

        let (result, rig) = run_until_shutdown(rig, async |sender, _, _| {
            sender.send_state_change("Speaking").await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await;

        assert!(result.is_ok());
        // The switch reached the pool before teardown.
        let speaking = crate::pool::testing::pgid_of(rig.dispatcher.supervisor().pool(), "Speaking");
        assert!(rig.control.ops().contains(&("resume", speaking)));
        assert_eq!(rig.dispatcher.supervisor().phase(), Phase::Terminated);
    }

    #[tokio::test]
    async fn swipe_is_forwarded_not_interpreted() {
        let rig = rig(&["Idle"]);

        let (result, _rig) = run_until_shutdown(rig, async |sender, _, events| {
            sender.send_swipe(SwipeSet::right()).await.unwrap();
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("swipe must be forwarded")
                .unwrap();
            assert_eq!(event, ForwardedEvent::Swipe(SwipeSet::right()));
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn garbage_then_valid_frame_recovers() {
        use tokio::io::AsyncWriteExt;

        let rig = rig(&["Idle"]);

        let (result, _rig) = run_until_shutdown(rig, async |sender, _, events| {
            // An unknown control byte forces a resync...
            sender.frames.get_mut().write_all(&[0x7f]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            // ...after which the stream decodes normally again.
            sender.send_swipe(SwipeSet::left()).await.unwrap();
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("frame after garbage must be decoded")
                .unwrap();
            assert_eq!(event, ForwardedEvent::Swipe(SwipeSet::left()));
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stalled_partial_frame_resynchronizes() {
        use tokio::io::AsyncWriteExt;

        let rig = rig(&["Idle"]);

        let (result, _rig) = run_until_shutdown(rig, async |sender, _, events| {
            // Control byte + truncated name of an image frame, then
            // silence past the read timeout.
            sender
                .frames
                .get_mut()
                .write_all(&[0x01, 0x09, b'w'])
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;

            sender.send_swipe(SwipeSet::right()).await.unwrap();
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("stalled partial frame must not wedge the loop")
                .unwrap();
            assert_eq!(event, ForwardedEvent::Swipe(SwipeSet::right()));
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn remote_command_activates() {
        let rig = rig(&["Idle", "Listening"]);

        let (result, rig) = run_until_shutdown(rig, async |_, handle, _| {
            assert!(handle.activate("Listening").await);
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await;

        assert!(result.is_ok());
        let listening =
            crate::pool::testing::pgid_of(rig.dispatcher.supervisor().pool(), "Listening");
        assert!(rig.control.ops().contains(&("resume", listening)));
        assert_eq!(rig.dispatcher.supervisor().phase(), Phase::Terminated);
    }

    #[tokio::test]
    async fn link_closure_is_fatal_and_tears_down() {
        let (near, far) = tokio::io::duplex(1024);
        let control = RecordingControl::new();
        let mut supervisor = DisplaySupervisor::new(fake_pool(control, &["Idle"]), "Idle");
        supervisor.initialize();
        let tmp = tempfile::tempdir().unwrap();
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (mut dispatcher, _handle) = Dispatcher::new(
            near,
            supervisor,
            ImageStore::new(tmp.path()),
            fast_config(),
            events_tx,
        );

        drop(far);
        let result = dispatcher.run().await;

        assert!(matches!(result, Err(DispatcherError::TransportClosed)));
        assert_eq!(dispatcher.supervisor().phase(), Phase::Terminated);
    }

    #[tokio::test]
    async fn eof_mid_frame_never_blocks() {
        use tokio::io::AsyncWriteExt;

        let (near, mut far) = tokio::io::duplex(1024);
        let control = RecordingControl::new();
        let mut supervisor = DisplaySupervisor::new(fake_pool(control, &["Idle"]), "Idle");
        supervisor.initialize();
        let tmp = tempfile::tempdir().unwrap();
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (mut dispatcher, _handle) = Dispatcher::new(
            near,
            supervisor,
            ImageStore::new(tmp.path()),
            fast_config(),
            events_tx,
        );

        // Half an image frame, then EOF.
        far.write_all(&[0x01, 0x04, b'w', b'a']).await.unwrap();
        drop(far);

        let result = tokio::time::timeout(Duration::from_secs(5), dispatcher.run())
            .await
            .expect("truncated stream must not block forever");
        assert!(matches!(result, Err(DispatcherError::TransportClosed)));
    }
}
