//! Active-animation supervisor.
//!
//! Owns the renderer pool and enforces the one rule the shared panel
//! imposes: at most one engine draws at any instant. Switching pauses the
//! outgoing engine and confirms it before the incoming one is resumed;
//! doing it the other way around would put two renderers on the panel at
//! once.
//!
//! All calls are made from the single dispatcher task, so transitions
//! never interleave.

use crate::pool::{PoolError, RendererPool};

/// Supervisor lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, pool not yet woken.
    Uninitialized,
    /// Resuming the default animation.
    Initializing,
    /// One animation visible (or none, if its engine died), ready to switch.
    Idle,
    /// Mid-switch: outgoing engine pausing, incoming not yet resumed.
    Switching,
    /// Tearing the pool down.
    ShuttingDown,
    /// Terminal. Every engine has been terminated.
    Terminated,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminated)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActivateError {
    /// No pool entry carries this name.
    #[error("unknown animation: {0}")]
    UnknownAnimation(String),

    /// The requested animation is already the visible one.
    #[error("animation already active: {0}")]
    AlreadyActive(String),

    /// The entry exists but its engine is permanently gone.
    #[error("animation is not selectable: {0}")]
    Unselectable(String),

    /// The supervisor is not in a phase that accepts activations.
    #[error("supervisor cannot activate in phase {0:?}")]
    NotAccepting(Phase),
}

/// Arbiter of which pooled engine drives the panel.
pub struct DisplaySupervisor {
    pool: RendererPool,
    phase: Phase,
    active: Option<String>,
    default_animation: String,
}

impl DisplaySupervisor {
    pub fn new(pool: RendererPool, default_animation: impl Into<String>) -> Self {
        Self {
            pool,
            phase: Phase::Uninitialized,
            active: None,
            default_animation: default_animation.into(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Name of the animation currently driving the panel, if any.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn pool(&self) -> &RendererPool {
        &self.pool
    }

    #[cfg(test)]
    pub(crate) fn pool_mut(&mut self) -> &mut RendererPool {
        &mut self.pool
    }

    /// One-time startup transition: bring the default animation up.
    ///
    /// A missing or dead default leaves the panel dark with a warning
    /// rather than failing startup; the link can still activate others.
    pub fn initialize(&mut self) {
        if self.phase != Phase::Uninitialized {
            tracing::warn!(phase = ?self.phase, "initialize called twice; ignoring");
            return;
        }
        self.phase = Phase::Initializing;
        match self.pool.resume(&self.default_animation) {
            Ok(()) => {
                tracing::info!(animation = %self.default_animation, "default animation active");
                self.active = Some(self.default_animation.clone());
            }
            Err(error) => {
                tracing::warn!(
                    animation = %self.default_animation,
                    %error,
                    "default animation unavailable; panel stays dark"
                );
            }
        }
        self.phase = Phase::Idle;
    }

    /// Make `name` the visible animation.
    ///
    /// The outgoing engine is paused and confirmed quiet before the target
    /// is resumed; a request for the current animation is rejected without
    /// touching any engine, so the panel never flickers on redundant
    /// requests.
    pub fn activate(&mut self, name: &str) -> Result<(), ActivateError> {
        if self.phase != Phase::Idle {
            return Err(ActivateError::NotAccepting(self.phase));
        }
        if self.active.as_deref() == Some(name) {
            return Err(ActivateError::AlreadyActive(name.to_string()));
        }
        match self.pool.status(name) {
            None => return Err(ActivateError::UnknownAnimation(name.to_string())),
            Some(status) if !status.is_selectable() => {
                tracing::warn!(animation = name, "activation of disabled entry ignored");
                return Err(ActivateError::Unselectable(name.to_string()));
            }
            Some(_) => {}
        }

        self.phase = Phase::Switching;
        if let Some(current) = self.active.take() {
            // Ordering is load-bearing: the panel is exclusive, so the
            // outgoing engine must be quiet before the target wakes.
            if let Err(error) = self.pool.pause(&current) {
                tracing::warn!(animation = %current, %error, "failed to pause outgoing engine");
            }
        }

        let result = match self.pool.resume(name) {
            Ok(()) => {
                tracing::info!(animation = name, "animation switched");
                self.active = Some(name.to_string());
                Ok(())
            }
            Err(PoolError::Unselectable(_)) => {
                tracing::warn!(
                    animation = name,
                    "target engine died before resume; panel stays dark"
                );
                Err(ActivateError::Unselectable(name.to_string()))
            }
            Err(error) => {
                tracing::warn!(animation = name, %error, "resume failed; panel stays dark");
                Err(ActivateError::Unselectable(name.to_string()))
            }
        };
        self.phase = Phase::Idle;
        result
    }

    /// Periodic duty: reap engines that exited on their own and drop the
    /// active designation if its engine is among them.
    pub fn on_liveness_tick(&mut self) {
        for name in self.pool.reap_exited() {
            if self.active.as_deref() == Some(name.as_str()) {
                tracing::warn!(animation = %name, "active rendering engine exited; panel dark");
                self.active = None;
            }
        }
    }

    /// Tear the pool down. Repeat calls are no-ops.
    pub async fn shutdown(&mut self) {
        if matches!(self.phase, Phase::ShuttingDown | Phase::Terminated) {
            return;
        }
        tracing::info!("supervisor shutting down");
        self.phase = Phase::ShuttingDown;
        self.active = None;
        self.pool.terminate_all().await;
        self.phase = Phase::Terminated;
    }
}
