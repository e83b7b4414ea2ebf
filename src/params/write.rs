//! Confirmed single-parameter writes
//!
//! A write is confirmed only by a `PARAM_VALUE` echo carrying the same name.
//! The echoed value is what gets reported back, since the vehicle may clamp
//! or round what it was sent.

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{FlightLinkError, Result};
use crate::mavlink::messages::{ParamSet, ParamValue};

/// Reply channel for a write intent
pub type WriteResponder = oneshot::Sender<Result<f32>>;

/// The one write currently awaiting its echo
#[derive(Debug)]
pub struct PendingWrite {
    name: String,
    value: f32,
    param_type: u8,
    attempt: u32,
    max_attempts: u32,
    responder: WriteResponder,
}

impl PendingWrite {
    /// Track a write whose first attempt is about to be sent
    pub fn new(name: String, value: f32, param_type: u8, max_attempts: u32, responder: WriteResponder) -> Self {
        Self {
            name,
            value,
            param_type,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            responder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempts sent so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether `echo` confirms this write
    pub fn matches(&self, echo: &ParamValue) -> bool {
        echo.param_id == self.name
    }

    /// Wire message for the current attempt
    pub fn to_message(&self, target_system: u8, target_component: u8) -> ParamSet {
        ParamSet {
            param_value: self.value,
            target_system,
            target_component,
            param_id: self.name.clone(),
            param_type: self.param_type,
        }
    }

    /// Write timer expired
    ///
    /// Returns `true` when another attempt should be sent; the attempt
    /// counter has already been advanced.
    pub fn on_timeout(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        debug!("Retrying write of {} (attempt {}/{})", self.name, self.attempt, self.max_attempts);
        true
    }

    /// Resolve with the echoed value
    pub fn confirm(self, echoed: f32) {
        debug!("Write of {} confirmed after {} attempt(s)", self.name, self.attempt);
        let _ = self.responder.send(Ok(echoed));
    }

    /// Resolve as failed after exhausting attempts
    pub fn fail(self) {
        warn!("Write of {} not confirmed after {} attempts", self.name, self.attempt);
        let _ = self.responder.send(Err(FlightLinkError::ParamWriteFailed {
            name: self.name,
            attempts: self.attempt,
        }));
    }

    /// Resolve with an arbitrary error (disconnect, transport failure)
    pub fn abort(self, error: FlightLinkError) {
        let _ = self.responder.send(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(name: &str, value: f32) -> ParamValue {
        ParamValue {
            param_value: value,
            param_count: 10,
            param_index: 3,
            param_id: name.into(),
            param_type: 9,
        }
    }

    #[test]
    fn test_fails_after_exactly_max_attempts() {
        let (tx, mut rx) = oneshot::channel();
        let mut write = PendingWrite::new("RATE_RLL_P".into(), 0.15, 9, 3, tx);

        let mut sent = 1;
        while write.on_timeout() {
            sent += 1;
        }
        assert_eq!(sent, 3);
        assert_eq!(write.attempt(), 3);

        write.fail();
        match rx.try_recv().unwrap() {
            Err(FlightLinkError::ParamWriteFailed { name, attempts }) => {
                assert_eq!(name, "RATE_RLL_P");
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected ParamWriteFailed, got: {:?}", other),
        }
    }

    #[test]
    fn test_confirmed_on_second_attempt_reports_echo() {
        let (tx, mut rx) = oneshot::channel();
        let mut write = PendingWrite::new("ARMING_CHECK".into(), 1.0, 6, 3, tx);

        assert!(write.on_timeout());
        assert_eq!(write.attempt(), 2);

        assert!(!write.matches(&echo("OTHER", 1.0)));
        assert!(write.matches(&echo("ARMING_CHECK", 0.0)));

        write.confirm(0.0);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 0.0);
    }

    #[test]
    fn test_to_message_carries_type() {
        let (tx, _rx) = oneshot::channel();
        let write = PendingWrite::new("SERIAL1_BAUD".into(), 57.0, 6, 3, tx);

        let msg = write.to_message(1, 1);
        assert_eq!(msg.param_id, "SERIAL1_BAUD");
        assert_eq!(msg.param_type, 6);
        assert_eq!(msg.param_value, 57.0);
        assert_eq!(msg.target_system, 1);
    }

    #[test]
    fn test_confirm_resolves_awaiting_caller() {
        let (tx, rx) = oneshot::channel();
        let write = PendingWrite::new("FS_THR_ENABLE".into(), 1.0, 2, 3, tx);
        write.confirm(1.0);

        let value = tokio_test::assert_ok!(tokio_test::block_on(rx).unwrap());
        assert_eq!(value, 1.0);
    }

    #[test]
    fn test_abort_forwards_error() {
        let (tx, mut rx) = oneshot::channel();
        let write = PendingWrite::new("X".into(), 1.0, 9, 3, tx);
        write.abort(FlightLinkError::NotConnected);
        assert!(matches!(rx.try_recv().unwrap(), Err(FlightLinkError::NotConnected)));
    }
}
