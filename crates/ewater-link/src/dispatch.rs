//! Command dispatch sequencer
//!
//! Sends an ordered list of line commands one at a time with a fixed pause
//! between them, because the controller processes its console slowly. The
//! first failed write stops the sequence. Nothing is retried or rolled
//! back, so a failure reports how many operations the device already has.
//!
//! The sequencer is a small state machine: [`DispatchSequence::next_action`]
//! says what to do next and [`DispatchSequence::record`] feeds back the
//! outcome of a send. [`DispatchSequence::run`] drives it against a
//! [`LineTransport`] with a tokio timer.

use std::time::Duration;

use ewater_core::{ApplyMode, LineCommand};
use thiserror::Error;

use crate::transport::{LineTransport, TransportError};

/// A failed dispatch
#[derive(Debug, Clone, Error, PartialEq)]
#[error(
    "Operation {} of {} ({}) failed: {}; applied up to operation {}",
    .index + 1, .total, .command, .source, .applied
)]
pub struct DispatchError {
    /// 0-based position of the failed operation
    pub index: usize,
    /// Masked wire text of the failed operation
    pub command: String,
    /// Operations the device accepted before the failure
    pub applied: usize,
    pub total: usize,
    pub source: TransportError,
}

/// Next thing the driver must do
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(LineCommand),
    Wait(Duration),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Ready to hand out the operation at the cursor
    Ready,
    /// An operation was handed out; waiting for its outcome
    Sending,
    /// Inter-operation pause pending before the next send
    Pausing,
    Completed,
    Failed,
}

/// Outcome of a fully successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Operations sent, including the apply/restart follow-up
    pub sent: usize,
}

pub struct DispatchSequence {
    commands: Vec<LineCommand>,
    delay: Duration,
    cursor: usize,
    state: SequenceState,
}

impl DispatchSequence {
    pub fn new(commands: Vec<LineCommand>, delay: Duration) -> Self {
        Self {
            commands,
            delay,
            cursor: 0,
            state: SequenceState::Ready,
        }
    }

    /// Append the apply-mode follow-up (`APPLY_CONFIG` or `RESTART`). It is
    /// only reached when every earlier operation succeeded.
    pub fn with_follow_up(mut self, mode: Option<ApplyMode>) -> Self {
        if let Some(mode) = mode {
            if !self.commands.is_empty() {
                self.commands.push(mode.follow_up());
            }
        }
        self
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn next_action(&mut self) -> Action {
        match self.state {
            SequenceState::Pausing => {
                self.state = SequenceState::Ready;
                Action::Wait(self.delay)
            }
            SequenceState::Ready => match self.commands.get(self.cursor) {
                Some(command) => {
                    self.state = SequenceState::Sending;
                    Action::Send(command.clone())
                }
                None => {
                    self.state = SequenceState::Completed;
                    Action::Finished
                }
            },
            // a send outcome is still owed; never hand out a second operation
            SequenceState::Sending => Action::Finished,
            SequenceState::Completed | SequenceState::Failed => Action::Finished,
        }
    }

    /// Record the outcome of the operation last returned by `next_action`.
    ///
    /// Outcomes that arrive when no operation is outstanding are ignored.
    pub fn record(&mut self, result: Result<(), TransportError>) -> Result<(), DispatchError> {
        if self.state != SequenceState::Sending {
            tracing::warn!(
                state = ?self.state,
                "Ignoring send outcome with no operation in flight"
            );
            return Ok(());
        }
        match result {
            Ok(()) => {
                self.cursor += 1;
                self.state = if self.cursor < self.commands.len() {
                    SequenceState::Pausing
                } else {
                    SequenceState::Ready
                };
                Ok(())
            }
            Err(source) => {
                self.state = SequenceState::Failed;
                Err(DispatchError {
                    index: self.cursor,
                    command: self.commands[self.cursor].masked(),
                    applied: self.cursor,
                    total: self.commands.len(),
                    source,
                })
            }
        }
    }

    /// Drive the sequence to completion over `transport`.
    pub async fn run(
        mut self,
        transport: &dyn LineTransport,
    ) -> Result<DispatchReport, DispatchError> {
        let total = self.commands.len();
        loop {
            match self.next_action() {
                Action::Send(command) => {
                    tracing::info!(
                        step = self.cursor + 1,
                        total,
                        command = %command.masked(),
                        "Sending"
                    );
                    let result = transport.write_line(&command.to_line()).await;
                    self.record(result).inspect_err(|e| {
                        tracing::error!(error = %e, "Dispatch aborted");
                    })?;
                }
                Action::Wait(delay) => tokio::time::sleep(delay).await,
                Action::Finished => {
                    tracing::debug!(sent = self.cursor, "Dispatch complete");
                    return Ok(DispatchReport { sent: self.cursor });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockLineTransport;
    use ewater_core::Verb;
    use tokio::time::Instant;

    fn ops(n: usize) -> Vec<LineCommand> {
        (0..n)
            .map(|i| LineCommand::new(Verb::SetPrice).with_arg((1000 + i).to_string()))
            .collect()
    }

    #[test]
    fn test_record_without_pending_send_is_ignored() {
        let mut empty = DispatchSequence::new(Vec::new(), Duration::from_millis(200));
        assert_eq!(empty.record(Err(TransportError::ConnectionClosed)), Ok(()));
        assert_eq!(empty.state(), SequenceState::Ready);

        let mut seq = DispatchSequence::new(ops(1), Duration::from_millis(200));
        assert!(matches!(seq.next_action(), Action::Send(_)));
        assert_eq!(seq.record(Ok(())), Ok(()));
        assert_eq!(seq.next_action(), Action::Finished);
        assert_eq!(seq.record(Err(TransportError::ConnectionClosed)), Ok(()));
        assert_eq!(seq.state(), SequenceState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_failure_stops_sequence() {
        let transport = MockLineTransport::new("mock");
        transport.fail_on_write(2);

        let err = DispatchSequence::new(ops(3), Duration::from_millis(200))
            .run(&transport)
            .await
            .unwrap_err();

        assert_eq!(transport.write_attempts(), 2);
        assert_eq!(transport.written(), vec!["SET_PRICE:1000"]);
        assert_eq!(err.index, 1);
        assert_eq!(err.applied, 1);
        assert_eq!(err.command, "SET_PRICE:1001");
        assert!(err.to_string().contains("applied up to operation 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_operations_only() {
        let transport = MockLineTransport::new("mock");
        let start = Instant::now();

        let report = DispatchSequence::new(ops(3), Duration::from_millis(200))
            .run(&transport)
            .await
            .unwrap();

        assert_eq!(report.sent, 3);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_up_after_success() {
        let transport = MockLineTransport::new("mock");
        let report = DispatchSequence::new(ops(1), Duration::from_millis(200))
            .with_follow_up(Some(ApplyMode::Restart))
            .run(&transport)
            .await
            .unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(transport.written(), vec!["SET_PRICE:1000", "RESTART"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_up_skipped_after_failure() {
        let transport = MockLineTransport::new("mock");
        transport.fail_on_write(1);
        let result = DispatchSequence::new(ops(2), Duration::from_millis(200))
            .with_follow_up(Some(ApplyMode::Now))
            .run(&transport)
            .await;

        tokio_test::assert_err!(result);
        assert!(transport.written().is_empty());
        assert_eq!(transport.write_attempts(), 1);
    }

    #[test]
    fn test_step_function() {
        let mut seq = DispatchSequence::new(ops(2), Duration::from_millis(200));
        assert!(matches!(seq.next_action(), Action::Send(_)));
        assert_eq!(seq.state(), SequenceState::Sending);
        seq.record(Ok(())).unwrap();
        assert_eq!(seq.next_action(), Action::Wait(Duration::from_millis(200)));
        assert!(matches!(seq.next_action(), Action::Send(_)));
        seq.record(Ok(())).unwrap();
        assert_eq!(seq.next_action(), Action::Finished);
        assert_eq!(seq.state(), SequenceState::Completed);
    }

    #[test]
    fn test_failure_masks_secrets() {
        let mut seq = DispatchSequence::new(
            vec![LineCommand::new(Verb::SetApiSecret).with_arg("k3y")],
            Duration::ZERO,
        );
        let _ = seq.next_action();
        let err = seq.record(Err(TransportError::ConnectionClosed)).unwrap_err();
        assert_eq!(err.command, "SET_API_SECRET:***");
        assert_eq!(seq.state(), SequenceState::Failed);
        assert_eq!(seq.next_action(), Action::Finished);
    }

    #[test]
    fn test_empty_sequence_ignores_follow_up() {
        let mut seq =
            DispatchSequence::new(Vec::new(), Duration::ZERO).with_follow_up(Some(ApplyMode::Now));
        assert!(seq.is_empty());
        assert_eq!(seq.next_action(), Action::Finished);
    }
}
