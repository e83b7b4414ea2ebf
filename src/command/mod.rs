//! # Command Module
//!
//! Correlates `COMMAND_LONG` requests with their `COMMAND_ACK`s.
//!
//! Acks carry only the command id, so at most one request per command id can
//! be outstanding. Registering the same id again supersedes the earlier
//! request, whose caller observes [`CommandReply::Cancelled`].

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::mavlink::messages::CommandAck;
use crate::mavlink::MavResult;

/// How an awaited command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandReply {
    /// The vehicle acknowledged with this result
    Ack(MavResult),
    /// No acknowledgement within the timeout
    TimedOut,
    /// Superseded, cancelled or the session closed
    Cancelled,
}

impl CommandReply {
    /// True only for `Ack(Accepted)`
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandReply::Ack(MavResult::Accepted))
    }
}

/// Reply channel for an awaited command
pub type AckResponder = oneshot::Sender<CommandReply>;

/// Outstanding acknowledgements keyed by command id
#[derive(Debug, Default)]
pub struct PendingAcks {
    entries: HashMap<u16, AckResponder>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the ack for `command`
    ///
    /// Returns `true` if an earlier registration was superseded.
    pub fn register(&mut self, command: u16, responder: AckResponder) -> bool {
        match self.entries.insert(command, responder) {
            Some(previous) => {
                warn!("Command {} re-sent before its ack; earlier request cancelled", command);
                let _ = previous.send(CommandReply::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Route an incoming ack
    ///
    /// Returns `true` if a registered request was resolved. `IN_PROGRESS`
    /// acks are interim and leave the registration in place.
    pub fn resolve(&mut self, ack: &CommandAck) -> bool {
        let result = MavResult::from(ack.result);
        if result == MavResult::InProgress {
            debug!("Command {} in progress ({}%)", ack.command, ack.progress);
            return false;
        }

        match self.entries.remove(&ack.command) {
            Some(responder) => {
                debug!("Command {} acknowledged: {:?}", ack.command, result);
                let _ = responder.send(CommandReply::Ack(result));
                true
            }
            None => false,
        }
    }

    /// Timeout elapsed for `command`
    pub fn expire(&mut self, command: u16) -> bool {
        match self.entries.remove(&command) {
            Some(responder) => {
                warn!("Command {} timed out waiting for ack", command);
                let _ = responder.send(CommandReply::TimedOut);
                true
            }
            None => false,
        }
    }

    /// Resolve `command` as cancelled
    pub fn cancel(&mut self, command: u16) -> bool {
        match self.entries.remove(&command) {
            Some(responder) => {
                let _ = responder.send(CommandReply::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding request
    pub fn clear(&mut self) {
        for (_, responder) in self.entries.drain() {
            let _ = responder.send(CommandReply::Cancelled);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
