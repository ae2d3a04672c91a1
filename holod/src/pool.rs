//! Rendering process pool.
//!
//! One external rendering engine per animation, spawned at startup and kept
//! alive for the life of the process. Switching animations never restarts
//! an engine: the pool freezes and thaws whole process groups instead.
//!
//! Flow:
//! 1. Scan the images root; every subdirectory (minus `_Idle` companion
//!    sets) becomes one entry.
//! 2. Spawn each engine in its own process group, give it a warmup to load
//!    frames, then send the pause sequence so nothing competes for the
//!    panel.
//! 3. The supervisor resumes exactly one entry at a time.
//! 4. Shutdown wakes everything, asks it to terminate, and escalates to a
//!    kill if an engine will not exit within the grace period.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::config::RendererConfig;

/// Directory suffix marking an idle companion image set.
pub const IDLE_SUFFIX: &str = "_Idle";

/// Lifecycle of one pooled rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererStatus {
    /// Spawned but not yet quiesced.
    NotStarted,
    /// Alive and stopped; not drawing.
    Paused,
    /// The one engine currently driving the panel.
    Active,
    /// Exited, killed, or never started. Permanently unselectable.
    Terminated,
}

impl RendererStatus {
    pub fn is_selectable(&self) -> bool {
        !matches!(self, RendererStatus::Terminated)
    }
}

/// One pooled animation and the engine rendering it.
#[derive(Debug)]
pub struct AnimationEntry {
    name: String,
    image_dir: PathBuf,
    child: Option<Child>,
    pgid: Option<Pid>,
    status: RendererStatus,
}

impl AnimationEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn status(&self) -> RendererStatus {
        self.status
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn rendering engine: {0}")]
    Spawn(#[from] io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no animation directories under {0}")]
    NoAnimations(PathBuf),
    #[error("unknown animation entry: {0}")]
    UnknownEntry(String),
    #[error("animation is not selectable: {0}")]
    Unselectable(String),
    #[error("pool I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Pause/resume/terminate capability over a renderer process group.
///
/// Implemented once over real signals; tests substitute a recorder to
/// assert ordering without touching processes.
pub trait ProcessControl: Send + Sync {
    /// Ask the engine to release the panel while still running. Sent
    /// immediately before [`ProcessControl::pause`].
    fn prepare(&self, pgid: Pid) -> io::Result<()>;
    fn pause(&self, pgid: Pid) -> io::Result<()>;
    fn resume(&self, pgid: Pid) -> io::Result<()>;
    fn terminate(&self, pgid: Pid) -> io::Result<()>;
    fn kill(&self, pgid: Pid) -> io::Result<()>;
    fn is_alive(&self, pgid: Pid) -> bool;
}

/// Signals the whole process group; the engine runs under a shell, so a
/// single-process signal would miss it.
pub struct SignalControl;

impl ProcessControl for SignalControl {
    fn prepare(&self, pgid: Pid) -> io::Result<()> {
        killpg(pgid, Signal::SIGUSR1).map_err(io::Error::from)
    }

    fn pause(&self, pgid: Pid) -> io::Result<()> {
        killpg(pgid, Signal::SIGSTOP).map_err(io::Error::from)
    }

    fn resume(&self, pgid: Pid) -> io::Result<()> {
        killpg(pgid, Signal::SIGCONT).map_err(io::Error::from)
    }

    fn terminate(&self, pgid: Pid) -> io::Result<()> {
        killpg(pgid, Signal::SIGTERM).map_err(io::Error::from)
    }

    fn kill(&self, pgid: Pid) -> io::Result<()> {
        killpg(pgid, Signal::SIGKILL).map_err(io::Error::from)
    }

    fn is_alive(&self, pgid: Pid) -> bool {
        killpg(pgid, None).is_ok()
    }
}

/// Extension point for how rendering engines are started.
pub trait RendererSpawner: Send + Sync {
    fn spawn(&self, name: &str, frames_glob: &str, idle_glob: &str) -> Result<Child, SpawnError>;
}

/// Spawns the LED image viewer with the configured panel flags.
pub struct ViewerSpawner {
    config: RendererConfig,
}

impl ViewerSpawner {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }
}

impl RendererSpawner for ViewerSpawner {
    fn spawn(&self, name: &str, frames_glob: &str, idle_glob: &str) -> Result<Child, SpawnError> {
        // The shell expands the image globs; the viewer takes the expanded
        // file list plus the `idle` keyword separating the companion set.
        let cmdline = format!(
            "{} {} {} idle {}",
            self.config.viewer_bin.display(),
            self.config.to_args().join(" "),
            frames_glob,
            idle_glob,
        );
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&cmdline)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()?;
        tracing::debug!(animation = name, command = %cmdline, "rendering engine spawned");
        Ok(child)
    }
}

/// How the pool spawns and controls engines, and how patient shutdown is.
pub struct PoolConfig {
    /// Time an engine gets to load its frames before the first pause.
    pub warmup: Duration,
    /// How long an engine may take to exit after a termination request.
    pub terminate_grace: Duration,
    pub spawner: Arc<dyn RendererSpawner>,
    pub control: Arc<dyn ProcessControl>,
}

impl PoolConfig {
    pub fn new(renderer: RendererConfig) -> Self {
        Self {
            warmup: Duration::from_secs(3),
            terminate_grace: Duration::from_secs(5),
            spawner: Arc::new(ViewerSpawner::new(renderer)),
            control: Arc::new(SignalControl),
        }
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn RendererSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }
}

/// The pool itself: name → entry, built once at startup.
pub struct RendererPool {
    entries: HashMap<String, AnimationEntry>,
    control: Arc<dyn ProcessControl>,
    terminate_grace: Duration,
}

impl RendererPool {
    /// Scan `images_root` and spawn one paused engine per animation
    /// directory. A spawn failure disables that entry and keeps going; an
    /// empty root is an error.
    pub async fn initialize(images_root: &Path, config: PoolConfig) -> Result<Self, PoolError> {
        let mut names = Vec::new();
        let mut read_dir = tokio::fs::read_dir(images_root).await?;
        while let Some(dir_entry) = read_dir.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = dir_entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.ends_with(IDLE_SUFFIX) {
                continue;
            }
            names.push(name.to_string());
        }
        names.sort();
        if names.is_empty() {
            return Err(PoolError::NoAnimations(images_root.to_path_buf()));
        }

        let mut entries = HashMap::new();
        for name in names {
            let image_dir = images_root.join(&name);
            let frames_glob = format!("{}/*.png", image_dir.display());
            let idle_glob = format!(
                "{}/*.png",
                images_root.join(format!("{name}{IDLE_SUFFIX}")).display()
            );

            let mut entry = match config.spawner.spawn(&name, &frames_glob, &idle_glob) {
                Ok(child) => {
                    let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
                    AnimationEntry {
                        name: name.clone(),
                        image_dir,
                        child: Some(child),
                        pgid,
                        status: RendererStatus::NotStarted,
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        animation = %name,
                        %error,
                        "rendering engine failed to spawn; entry disabled"
                    );
                    AnimationEntry {
                        name: name.clone(),
                        image_dir,
                        child: None,
                        pgid: None,
                        status: RendererStatus::Terminated,
                    }
                }
            };

            if entry.status != RendererStatus::Terminated {
                tokio::time::sleep(config.warmup).await;
                quiesce(&*config.control, &mut entry);
            }
            entries.insert(name, entry);
        }

        let pool = Self {
            entries,
            control: config.control,
            terminate_grace: config.terminate_grace,
        };
        tracing::info!(animations = pool.entries.len(), "renderer pool initialized");
        Ok(pool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&AnimationEntry> {
        self.entries.get(name)
    }

    pub fn status(&self, name: &str) -> Option<RendererStatus> {
        self.entries.get(name).map(|e| e.status)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&str, RendererStatus)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), e.status))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Send the pause sequence to one entry. Pausing an entry that has
    /// already terminated is a no-op; a dead engine is disabled instead of
    /// signaled.
    pub fn pause(&mut self, name: &str) -> Result<(), PoolError> {
        let control = Arc::clone(&self.control);
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownEntry(name.to_string()))?;
        if entry.status == RendererStatus::Terminated {
            return Ok(());
        }
        quiesce(&*control, entry);
        Ok(())
    }

    /// Wake one paused entry and mark it the drawing engine.
    pub fn resume(&mut self, name: &str) -> Result<(), PoolError> {
        let control = Arc::clone(&self.control);
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownEntry(name.to_string()))?;
        if entry.status == RendererStatus::Terminated {
            return Err(PoolError::Unselectable(name.to_string()));
        }
        let Some(pgid) = entry.pgid else {
            entry.status = RendererStatus::Terminated;
            return Err(PoolError::Unselectable(name.to_string()));
        };
        if !control.is_alive(pgid) {
            tracing::warn!(animation = %entry.name, "rendering engine is gone; entry disabled");
            entry.status = RendererStatus::Terminated;
            return Err(PoolError::Unselectable(name.to_string()));
        }
        if let Err(error) = control.resume(pgid) {
            tracing::warn!(animation = %entry.name, %error, "resume failed; entry disabled");
            entry.status = RendererStatus::Terminated;
            return Err(PoolError::Unselectable(name.to_string()));
        }
        entry.status = RendererStatus::Active;
        Ok(())
    }

    /// Periodic sweep: reap engines that exited on their own. Returns the
    /// names that transitioned to `Terminated`.
    pub fn reap_exited(&mut self) -> Vec<String> {
        let mut exited = Vec::new();
        for entry in self.entries.values_mut() {
            let Some(child) = entry.child.as_mut() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!(animation = %entry.name, %status, "rendering engine exited");
                    entry.child = None;
                    entry.status = RendererStatus::Terminated;
                    exited.push(entry.name.clone());
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(animation = %entry.name, %error, "liveness check failed");
                }
            }
        }
        exited
    }

    /// Terminate every engine: wake, ask, wait, escalate.
    ///
    /// Safe to call repeatedly; entries that already exited are tolerated.
    pub async fn terminate_all(&mut self) {
        let control = Arc::clone(&self.control);

        // A stopped engine cannot act on a termination request.
        for entry in self.entries.values() {
            if let Some(pgid) = entry.pgid
                && matches!(
                    entry.status,
                    RendererStatus::Paused | RendererStatus::NotStarted
                )
                && let Err(error) = control.resume(pgid)
            {
                tracing::debug!(animation = %entry.name, %error, "wake before terminate failed");
            }
        }

        for entry in self.entries.values() {
            if let Some(pgid) = entry.pgid
                && let Err(error) = control.terminate(pgid)
            {
                tracing::debug!(animation = %entry.name, %error, "terminate signal failed");
            }
        }

        for entry in self.entries.values_mut() {
            if let Some(mut child) = entry.child.take() {
                match tokio::time::timeout(self.terminate_grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(animation = %entry.name, %status, "rendering engine exited");
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(animation = %entry.name, %error, "wait for engine failed");
                    }
                    Err(_) => {
                        tracing::warn!(
                            animation = %entry.name,
                            "engine ignored termination; killing process group"
                        );
                        if let Some(pgid) = entry.pgid
                            && let Err(error) = control.kill(pgid)
                        {
                            tracing::warn!(animation = %entry.name, %error, "kill failed");
                        }
                        if tokio::time::timeout(self.terminate_grace, child.wait())
                            .await
                            .is_err()
                        {
                            tracing::error!(
                                animation = %entry.name,
                                "rendering engine unresponsive after kill"
                            );
                        }
                    }
                }
            }
            entry.status = RendererStatus::Terminated;
        }
        tracing::info!("renderer pool terminated");
    }
}

/// Pause sequence: confirm the engine is there, let it release the panel,
/// then stop the group. A dead engine is disabled rather than signaled.
fn quiesce(control: &dyn ProcessControl, entry: &mut AnimationEntry) {
    let Some(pgid) = entry.pgid else {
        entry.status = RendererStatus::Terminated;
        return;
    };
    if !control.is_alive(pgid) {
        tracing::warn!(animation = %entry.name, "rendering engine died before it could be paused");
        entry.status = RendererStatus::Terminated;
        return;
    }
    if let Err(error) = control.prepare(pgid).and_then(|_| control.pause(pgid)) {
        tracing::warn!(animation = %entry.name, %error, "pause sequence failed; entry disabled");
        entry.status = RendererStatus::Terminated;
        return;
    }
    entry.status = RendererStatus::Paused;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every signal instead of delivering one.
    pub(crate) struct RecordingControl {
        ops: Mutex<Vec<(&'static str, i32)>>,
        dead: Mutex<HashSet<i32>>,
    }

    impl RecordingControl {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                ops: Mutex::new(Vec::new()),
                dead: Mutex::new(HashSet::new()),
            })
        }

        pub(crate) fn ops(&self) -> Vec<(&'static str, i32)> {
            self.ops.lock().unwrap().clone()
        }

        pub(crate) fn clear_ops(&self) {
            self.ops.lock().unwrap().clear();
        }

        pub(crate) fn mark_dead(&self, pgid: i32) {
            self.dead.lock().unwrap().insert(pgid);
        }

        fn record(&self, op: &'static str, pgid: Pid) -> io::Result<()> {
            if self.dead.lock().unwrap().contains(&pgid.as_raw()) {
                return Err(io::Error::from(nix::errno::Errno::ESRCH));
            }
            self.ops.lock().unwrap().push((op, pgid.as_raw()));
            Ok(())
        }
    }

    impl ProcessControl for RecordingControl {
        fn prepare(&self, pgid: Pid) -> io::Result<()> {
            self.record("prepare", pgid)
        }

        fn pause(&self, pgid: Pid) -> io::Result<()> {
            self.record("pause", pgid)
        }

        fn resume(&self, pgid: Pid) -> io::Result<()> {
            self.record("resume", pgid)
        }

        fn terminate(&self, pgid: Pid) -> io::Result<()> {
            self.record("terminate", pgid)
        }

        fn kill(&self, pgid: Pid) -> io::Result<()> {
            self.record("kill", pgid)
        }

        fn is_alive(&self, pgid: Pid) -> bool {
            !self.dead.lock().unwrap().contains(&pgid.as_raw())
        }
    }

    /// Pool over synthetic paused entries with no real children.
    pub(crate) fn fake_pool(control: Arc<dyn ProcessControl>, names: &[&str]) -> RendererPool {
        let mut entries = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            entries.insert(
                name.to_string(),
                AnimationEntry {
                    name: name.to_string(),
                    image_dir: PathBuf::from(format!("images/{name}")),
                    child: None,
                    pgid: Some(Pid::from_raw(1000 + i as i32)),
                    status: RendererStatus::Paused,
                },
            );
        }
        RendererPool {
            entries,
            control,
            terminate_grace: Duration::from_millis(200),
        }
    }

    pub(crate) fn pgid_of(pool: &RendererPool, name: &str) -> i32 {
        pool.entries[name].pgid.unwrap().as_raw()
    }

    pub(crate) fn set_status(pool: &mut RendererPool, name: &str, status: RendererStatus) {
        pool.entries.get_mut(name).unwrap().status = status;
    }
}
