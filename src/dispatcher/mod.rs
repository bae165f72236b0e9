//! Volume-command dispatcher and silence timer.
//!
//! Turns the stream of [`AttentionVerdict`]s into [`VolumeCommand`]s, with
//! debouncing in the dimmed state and a silence timer that auto-restores
//! after a period with no further directed speech. The dispatcher holds a
//! send-command capability handed to it at construction; it never reaches
//! back into the connection hub itself, keeping the wiring unidirectional.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::types::{AttentionVerdict, VerdictKind, VolumeCommand, VolumeCommandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Normal,
    Dimmed,
}

/// Where the dispatcher delivers the commands it emits. Implemented by the
/// connection hub in production and by an in-memory recorder in tests.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, command: VolumeCommand);
}

struct Inner {
    state: DispatcherState,
    sensitivity: f32,
    silence_timeout_ms: u64,
    /// Bumped on every start/reset/cancel; a sleeping timer task only acts
    /// if the generation it captured is still current when it wakes.
    timer_generation: u64,
    timer_pending: bool,
}

pub struct Dispatcher {
    inner: Mutex<Inner>,
    sink: Arc<dyn CommandSink>,
}

impl Dispatcher {
    pub fn new(sensitivity: f32, silence_timeout_ms: u64, sink: Arc<dyn CommandSink>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: DispatcherState::Normal,
                sensitivity,
                silence_timeout_ms,
                timer_generation: 0,
                timer_pending: false,
            }),
            sink,
        })
    }

    pub async fn state(&self) -> DispatcherState {
        self.inner.lock().await.state
    }

    pub async fn timer_pending(&self) -> bool {
        self.inner.lock().await.timer_pending
    }

    pub async fn set_sensitivity(&self, sensitivity: f32) {
        self.inner.lock().await.sensitivity = sensitivity.clamp(0.0, 1.0);
    }

    pub async fn set_silence_timeout_ms(&self, ms: u64) {
        self.inner.lock().await.silence_timeout_ms = ms.max(1000);
    }

    /// Applies the transition table in response to a verdict.
    pub async fn handle_verdict(self: &Arc<Self>, verdict: &AttentionVerdict) {
        enum Action {
            None,
            EmitDimAndStartTimer(VerdictKind, f32),
            ResetTimer,
            StartTimerIfAbsent,
        }

        let action = {
            let mut inner = self.inner.lock().await;
            let sensitivity = inner.sensitivity;
            match (inner.state, verdict.kind) {
                (DispatcherState::Normal, VerdictKind::DefinitelyToMe) => {
                    inner.state = DispatcherState::Dimmed;
                    Action::EmitDimAndStartTimer(VerdictKind::DefinitelyToMe, 0.95)
                }
                (DispatcherState::Normal, VerdictKind::ProbablyToMe) if sensitivity > 0.5 => {
                    inner.state = DispatcherState::Dimmed;
                    Action::EmitDimAndStartTimer(VerdictKind::ProbablyToMe, 0.7)
                }
                (DispatcherState::Normal, VerdictKind::ProbablyToMe) => Action::None,
                (DispatcherState::Normal, VerdictKind::Ignore) => Action::None,
                (DispatcherState::Dimmed, VerdictKind::DefinitelyToMe) => Action::ResetTimer,
                (DispatcherState::Dimmed, VerdictKind::ProbablyToMe) if sensitivity > 0.5 => {
                    Action::ResetTimer
                }
                (DispatcherState::Dimmed, VerdictKind::ProbablyToMe) => Action::None,
                (DispatcherState::Dimmed, VerdictKind::Ignore) => Action::StartTimerIfAbsent,
            }
        };

        match action {
            Action::None => {}
            Action::EmitDimAndStartTimer(reason, confidence) => {
                self.emit(VolumeCommandKind::Dim, reason, confidence).await;
                self.start_timer().await;
            }
            Action::ResetTimer => self.start_timer().await,
            Action::StartTimerIfAbsent => self.start_timer_if_absent().await,
        }
    }

    /// Cancels any timer and, if dimmed, emits RESTORE.
    pub async fn force_restore(self: &Arc<Self>) {
        self.cancel_timer().await;
        let was_dimmed = {
            let mut inner = self.inner.lock().await;
            let was_dimmed = inner.state == DispatcherState::Dimmed;
            inner.state = DispatcherState::Normal;
            was_dimmed
        };
        if was_dimmed {
            self.emit(VolumeCommandKind::Restore, VerdictKind::Ignore, 1.0)
                .await;
        }
    }

    /// Cancels any timer, emits DIM unconditionally, starts a fresh timer.
    pub async fn force_dim(self: &Arc<Self>) {
        self.cancel_timer().await;
        {
            let mut inner = self.inner.lock().await;
            inner.state = DispatcherState::Dimmed;
        }
        self.emit(VolumeCommandKind::Dim, VerdictKind::DefinitelyToMe, 0.95)
            .await;
        self.start_timer().await;
    }

    async fn emit(&self, kind: VolumeCommandKind, trigger_reason: VerdictKind, confidence: f32) {
        self.sink
            .send(VolumeCommand::new(kind, trigger_reason, confidence))
            .await;
    }

    async fn cancel_timer(&self) {
        let mut inner = self.inner.lock().await;
        inner.timer_generation += 1;
        inner.timer_pending = false;
    }

    /// Invalidates any pending timer and starts a fresh one (used for both
    /// the initial DIM and every debounce reset).
    async fn start_timer(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.timer_generation += 1;
            inner.timer_pending = true;
            inner.timer_generation
        };
        self.spawn_timer(generation);
    }

    /// Starts a timer only if none is currently pending.
    async fn start_timer_if_absent(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.timer_pending {
                return;
            }
            inner.timer_generation += 1;
            inner.timer_pending = true;
            inner.timer_generation
        };
        self.spawn_timer(generation);
    }

    fn spawn_timer(self: &Arc<Self>, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            let timeout_ms = this.inner.lock().await.silence_timeout_ms;
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;

            let should_restore = {
                let mut inner = this.inner.lock().await;
                if inner.timer_generation != generation {
                    return; // superseded by a reset or cancel
                }
                inner.timer_pending = false;
                if inner.state == DispatcherState::Dimmed {
                    inner.state = DispatcherState::Normal;
                    true
                } else {
                    false
                }
            };
            if should_restore {
                this.emit(VolumeCommandKind::Restore, VerdictKind::Ignore, 1.0)
                    .await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VerdictExplanation;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingSink {
        commands: TokioMutex<Vec<VolumeCommand>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commands: TokioMutex::new(Vec::new()),
            })
        }

        async fn commands(&self) -> Vec<VolumeCommand> {
            self.commands.lock().await.clone()
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&self, command: VolumeCommand) {
            self.commands.lock().await.push(command);
        }
    }

    fn verdict(kind: VerdictKind, confidence: f32) -> AttentionVerdict {
        AttentionVerdict::new(kind, confidence, VerdictExplanation::default())
    }

    #[tokio::test]
    async fn definite_in_normal_emits_dim_and_starts_timer() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.7, 5000, sink.clone());
        dispatcher
            .handle_verdict(&verdict(VerdictKind::DefinitelyToMe, 0.95))
            .await;

        assert_eq!(dispatcher.state().await, DispatcherState::Dimmed);
        assert!(dispatcher.timer_pending().await);
        let commands = sink.commands().await;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, VolumeCommandKind::Dim);
    }

    #[tokio::test]
    async fn probably_below_threshold_sensitivity_does_not_emit() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.4, 5000, sink.clone());
        dispatcher
            .handle_verdict(&verdict(VerdictKind::ProbablyToMe, 0.7))
            .await;

        assert_eq!(dispatcher.state().await, DispatcherState::Normal);
        assert!(sink.commands().await.is_empty());
    }

    #[tokio::test]
    async fn probably_above_threshold_emits_dim() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.8, 5000, sink.clone());
        dispatcher
            .handle_verdict(&verdict(VerdictKind::ProbablyToMe, 0.7))
            .await;

        assert_eq!(dispatcher.state().await, DispatcherState::Dimmed);
        assert_eq!(sink.commands().await.len(), 1);
    }

    #[tokio::test]
    async fn ignore_in_normal_never_starts_a_timer() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.7, 5000, sink.clone());
        dispatcher.handle_verdict(&verdict(VerdictKind::Ignore, 0.9)).await;

        assert_eq!(dispatcher.state().await, DispatcherState::Normal);
        assert!(!dispatcher.timer_pending().await);
    }

    #[tokio::test]
    async fn auto_restore_after_silence_timeout() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.7, 50, sink.clone());
        dispatcher
            .handle_verdict(&verdict(VerdictKind::DefinitelyToMe, 0.95))
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(dispatcher.state().await, DispatcherState::Normal);
        let commands = sink.commands().await;
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].kind, VolumeCommandKind::Restore);
        assert_eq!(commands[1].trigger_reason, VerdictKind::Ignore);
    }

    #[tokio::test]
    async fn further_speech_resets_the_timer_without_a_new_command() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.7, 100, sink.clone());
        dispatcher
            .handle_verdict(&verdict(VerdictKind::DefinitelyToMe, 0.95))
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        dispatcher
            .handle_verdict(&verdict(VerdictKind::DefinitelyToMe, 0.95))
            .await;

        // Still within the reset window; only the original DIM fired.
        assert_eq!(sink.commands().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dispatcher.state().await, DispatcherState::Normal);
        assert_eq!(sink.commands().await.len(), 2);
    }

    #[tokio::test]
    async fn force_restore_cancels_timer_and_restores() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.7, 5000, sink.clone());
        dispatcher
            .handle_verdict(&verdict(VerdictKind::DefinitelyToMe, 0.95))
            .await;
        dispatcher.force_restore().await;

        assert_eq!(dispatcher.state().await, DispatcherState::Normal);
        assert!(!dispatcher.timer_pending().await);
        assert_eq!(sink.commands().await.len(), 2);
    }

    #[tokio::test]
    async fn force_dim_emits_unconditionally() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(0.7, 5000, sink.clone());
        dispatcher.force_dim().await;

        assert_eq!(dispatcher.state().await, DispatcherState::Dimmed);
        assert!(dispatcher.timer_pending().await);
        assert_eq!(sink.commands().await.len(), 1);
    }
}
