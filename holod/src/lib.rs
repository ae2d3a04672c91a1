//! holod: serial link protocol and render-process supervision for an LED
//! hologram display.
//!
//! A small binary protocol over a serial link carries animation image sets,
//! animation-state changes, and gesture events. One rendering engine per
//! animation is kept alive and paused; switching the visible animation is a
//! pause/resume handover rather than a process restart, so it is
//! instantaneous.

pub mod config;
pub mod dispatcher;
pub mod link;
pub mod pool;
pub mod store;
pub mod supervisor;
pub mod swipe;

pub use config::RendererConfig;
pub use dispatcher::{
    Dispatcher, DispatcherCommand, DispatcherError, DispatcherHandle, ForwardedEvent, LinkSender,
};
pub use link::codec::LinkCodec;
pub use link::frame::{Frame, FramingError, SwipeDirection, SwipeSet};
pub use link::transport::{ByteLink, LinkConfig, open_serial};
pub use pool::{
    AnimationEntry, PoolConfig, PoolError, ProcessControl, RendererPool, RendererSpawner,
    RendererStatus, SignalControl, SpawnError, ViewerSpawner,
};
pub use store::{ImageStore, StoreError};
pub use supervisor::{ActivateError, DisplaySupervisor, Phase};
pub use swipe::SwipeDetector;
