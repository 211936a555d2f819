//! Handshake channels between a primary scope and its replay thread.
//!
//! Two bounded lanes carry the protocol:
//!
//! - primary to replay: [`Command::Invoke`] / [`Command::Exit`], and a
//!   separate acknowledgement lane for forwarded values;
//! - replay to primary: [`Report::Forwarded`] for every value that passes a
//!   recovery interceptor, then [`Report::Completed`] when the invocation ends.
//!
//! The lanes are `tokio::sync::mpsc` channels driven with `blocking_*` calls
//! from plain threads. Calling into them from inside a Tokio runtime worker
//! panics, so guarded scopes must not run on runtime threads.

use aftershock_core::{FaultSignature, InterceptKind, Role, ScopeId};
use aftershock_detector::{Detector, quiet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;

const LANE_CAPACITY: usize = 1;

/// Primary to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the guarded callable once
    Invoke,
    /// Leave the replay loop
    Exit,
}

/// Replay to primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// A value passed a recovery interceptor on the replay thread
    Forwarded {
        /// Interceptor it passed through
        kind: InterceptKind,
        /// Its signature, `None` when no fault or error was present
        signature: Option<FaultSignature>,
    },
    /// The replay invocation returned (or its escaped panic was contained)
    Completed,
}

/// The other side of the handshake is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("handshake for {scope} closed")]
pub struct HandshakeClosed {
    /// Scope whose handshake closed
    pub scope: ScopeId,
}

/// Which side may execute guarded code right now.
///
/// Only ever changed by the side handing over control, with relaxed
/// ordering: the channels carry the actual synchronisation, the marker only
/// lets debug builds assert the alternation.
#[derive(Debug)]
pub struct Turn(AtomicU8);

const PRIMARY_TURN: u8 = 0;
const REPLAY_TURN: u8 = 1;

impl Turn {
    fn new() -> Self {
        Self(AtomicU8::new(PRIMARY_TURN))
    }

    /// Side currently allowed to run
    #[must_use]
    pub fn holder(&self) -> Role {
        match self.0.load(Ordering::Relaxed) {
            REPLAY_TURN => Role::Replay,
            _ => Role::Primary,
        }
    }

    fn hand_to(&self, role: Role) {
        let value = match role {
            Role::Primary => PRIMARY_TURN,
            Role::Replay => REPLAY_TURN,
        };
        self.0.store(value, Ordering::Relaxed);
    }
}

/// Primary-side endpoint, owned by the scope record
#[derive(Debug)]
pub struct PrimaryPort {
    scope: ScopeId,
    commands: mpsc::Sender<Command>,
    reports: mpsc::Receiver<Report>,
    acks: mpsc::Sender<()>,
    turn: Arc<Turn>,
}

impl PrimaryPort {
    /// Start one replay invocation.
    ///
    /// The send runs in a quiet region so the detector does not see the
    /// primary and replay synchronise after thread creation.
    ///
    /// # Errors
    ///
    /// Returns error if the replay thread is gone
    pub fn dispatch(&self, detector: &dyn Detector) -> Result<(), HandshakeClosed> {
        debug_assert_eq!(self.turn.holder(), Role::Primary, "dispatch while replay holds the turn");
        self.turn.hand_to(Role::Replay);
        let sent = {
            let _quiet = quiet(detector);
            self.commands.blocking_send(Command::Invoke)
        };
        tracing::trace!(scope = %self.scope, "invoke sent");
        sent.map_err(|_| self.closed())
    }

    /// Wait for the replay's next report; `None` if the replay thread is gone
    pub fn next_report(&mut self) -> Option<Report> {
        let report = self.reports.blocking_recv();
        tracing::trace!(scope = %self.scope, ?report, "report received");
        report
    }

    /// Release the replay thread blocked on a forwarded value
    ///
    /// # Errors
    ///
    /// Returns error if the replay thread is gone
    pub fn acknowledge(&self) -> Result<(), HandshakeClosed> {
        self.acks.blocking_send(()).map_err(|_| self.closed())
    }

    /// Take the turn back after the replay invocation finished
    pub fn reclaim_turn(&self) {
        self.turn.hand_to(Role::Primary);
    }

    /// Tell the replay thread to leave its loop; a gone thread is fine
    pub fn shutdown(&self, detector: &dyn Detector) {
        let _quiet = quiet(detector);
        if self.commands.blocking_send(Command::Exit).is_err() {
            tracing::trace!(scope = %self.scope, "replay thread already gone at shutdown");
        }
    }

    fn closed(&self) -> HandshakeClosed {
        HandshakeClosed { scope: self.scope }
    }
}

/// Replay-side endpoint, moved into the replay thread
#[derive(Debug)]
pub struct ReplayPort {
    scope: ScopeId,
    commands: mpsc::Receiver<Command>,
    reports: mpsc::Sender<Report>,
    acks: mpsc::Receiver<()>,
    turn: Arc<Turn>,
}

impl ReplayPort {
    /// Split into the loop's command inbox and the interceptor binding
    #[must_use]
    pub fn split(self) -> (CommandInbox, ReplayBinding) {
        let inbox = CommandInbox {
            scope: self.scope,
            commands: self.commands,
            completions: self.reports.clone(),
            turn: self.turn,
        };
        let binding = ReplayBinding {
            scope: self.scope,
            reports: self.reports,
            acks: self.acks,
        };
        (inbox, binding)
    }
}

/// Commands seen by the replay loop
#[derive(Debug)]
pub struct CommandInbox {
    scope: ScopeId,
    commands: mpsc::Receiver<Command>,
    completions: mpsc::Sender<Report>,
    turn: Arc<Turn>,
}

impl CommandInbox {
    /// Wait for the next command in a quiet region; a closed lane means exit
    pub fn wait(&mut self, detector: &dyn Detector) -> Command {
        let command = {
            let _quiet = quiet(detector);
            self.commands.blocking_recv()
        };
        command.unwrap_or(Command::Exit)
    }

    /// Tell the primary the invocation finished
    ///
    /// # Errors
    ///
    /// Returns error if the primary side is gone
    pub fn complete(&self) -> Result<(), HandshakeClosed> {
        self.completions
            .blocking_send(Report::Completed)
            .map_err(|_| HandshakeClosed { scope: self.scope })
    }

    /// Side currently allowed to run
    #[must_use]
    pub fn turn(&self) -> Role {
        self.turn.holder()
    }
}

/// What a recovery interceptor on the replay thread forwards through
#[derive(Debug)]
pub struct ReplayBinding {
    scope: ScopeId,
    reports: mpsc::Sender<Report>,
    acks: mpsc::Receiver<()>,
}

impl ReplayBinding {
    /// Scope this binding belongs to
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Forward a value and wait until the primary has looked at it
    ///
    /// # Errors
    ///
    /// Returns error if the primary side is gone
    pub fn forward(
        &mut self,
        kind: InterceptKind,
        signature: Option<FaultSignature>,
    ) -> Result<(), HandshakeClosed> {
        let closed = HandshakeClosed { scope: self.scope };
        self.reports
            .blocking_send(Report::Forwarded { kind, signature })
            .map_err(|_| closed)?;
        self.acks.blocking_recv().ok_or(closed)
    }
}

/// Create both endpoints for one primary scope
#[must_use]
pub fn pair(scope: ScopeId) -> (PrimaryPort, ReplayPort) {
    let (command_tx, command_rx) = mpsc::channel(LANE_CAPACITY);
    let (report_tx, report_rx) = mpsc::channel(LANE_CAPACITY);
    let (ack_tx, ack_rx) = mpsc::channel(LANE_CAPACITY);
    let turn = Arc::new(Turn::new());
    let primary = PrimaryPort {
        scope,
        commands: command_tx,
        reports: report_rx,
        acks: ack_tx,
        turn: Arc::clone(&turn),
    };
    let replay = ReplayPort {
        scope,
        commands: command_rx,
        reports: report_tx,
        acks: ack_rx,
        turn,
    };
    (primary, replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aftershock_detector::RecordingDetector;
    use std::thread;

    fn scope() -> ScopeId {
        ScopeId::from_raw(9)
    }

    #[test]
    fn test_invoke_forward_complete_roundtrip() {
        let detector = RecordingDetector::new();
        let (mut primary, replay) = pair(scope());
        let (mut inbox, mut binding) = replay.split();

        let worker = thread::spawn(move || {
            let quiet_detector = RecordingDetector::new();
            assert_eq!(inbox.wait(&quiet_detector), Command::Invoke);
            assert_eq!(inbox.turn(), Role::Replay);
            binding
                .forward(InterceptKind::Recover, Some(FaultSignature::from_display(&"x")))
                .unwrap();
            inbox.complete().unwrap();
            assert_eq!(inbox.wait(&quiet_detector), Command::Exit);
            quiet_detector.is_balanced()
        });

        primary.dispatch(&detector).unwrap();
        assert_eq!(
            primary.next_report(),
            Some(Report::Forwarded {
                kind: InterceptKind::Recover,
                signature: Some(FaultSignature::from_display(&"x")),
            })
        );
        primary.acknowledge().unwrap();
        assert_eq!(primary.next_report(), Some(Report::Completed));
        primary.reclaim_turn();
        primary.shutdown(&detector);

        assert!(worker.join().unwrap());
        assert!(detector.is_balanced());
        assert_eq!(detector.regions_opened(), 2);
    }

    #[test]
    fn test_closed_replay_side_is_reported() {
        let detector = RecordingDetector::new();
        let (mut primary, replay) = pair(scope());
        drop(replay);
        assert_eq!(primary.dispatch(&detector), Err(HandshakeClosed { scope: scope() }));
        assert_eq!(primary.next_report(), None);
        primary.shutdown(&detector);
        assert!(detector.is_balanced());
    }

    #[test]
    fn test_closed_command_lane_means_exit() {
        let detector = RecordingDetector::new();
        let (primary, replay) = pair(scope());
        let (mut inbox, _binding) = replay.split();
        drop(primary);
        assert_eq!(inbox.wait(&detector), Command::Exit);
    }

    #[test]
    fn test_turn_starts_with_primary() {
        let (primary, replay) = pair(scope());
        let (inbox, binding) = replay.split();
        assert_eq!(inbox.turn(), Role::Primary);
        assert_eq!(binding.scope(), scope());
        primary.reclaim_turn();
        assert_eq!(inbox.turn(), Role::Primary);
    }
}
