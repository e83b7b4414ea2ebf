//! Loss-tolerant parameter download
//!
//! A sans-IO state machine: the session feeds it value messages and timer
//! expirations, and executes the [`SyncCommand`]s it returns.
//!
//! 1. **Burst**: one `PARAM_REQUEST_LIST`; each new index re-arms the settle timer.
//! 2. **Settle**: the quiet timer fired with indices still missing.
//! 3. **Targeted retry**: request each eligible missing index by number, spaced
//!    out, then wait a grace period and re-evaluate.
//!
//! Completion is latched. Write echoes arrive as ordinary value messages and
//! must never re-run completion.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::table::{ParamEntry, ParamTable};
use crate::mavlink::messages::ParamValue;

/// What the session should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    /// Send `PARAM_REQUEST_LIST`
    RequestList,
    /// (Re)arm the burst settle timer
    ArmSettle,
    /// Send `PARAM_REQUEST_READ` for one index
    RequestIndex(u16),
    /// Arm the inter-request spacing timer
    ArmSpacing,
    /// Arm the post-pass grace timer
    ArmGrace,
    /// Download finished; cancel all download timers
    Complete(SyncSummary),
}

/// Outcome of a finished download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub received: usize,
    pub total: usize,
    /// Indices never retrieved
    pub stragglers: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Burst,
    Retrying,
    Complete,
}

/// Download bookkeeping for one session
#[derive(Debug, Default, Clone)]
pub struct ParamLedger {
    total: Option<u16>,
    received: BTreeSet<u16>,
    /// Individual requests sent per missing index
    retries: BTreeMap<u16, u32>,
}

impl ParamLedger {
    /// Total advertised by the first value message
    pub fn total(&self) -> Option<u16> {
        self.total
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn is_received(&self, index: u16) -> bool {
        self.received.contains(&index)
    }

    /// Individual requests issued for `index`
    pub fn retries(&self, index: u16) -> u32 {
        self.retries.get(&index).copied().unwrap_or(0)
    }

    fn missing(&self) -> Vec<u16> {
        match self.total {
            Some(total) => (0..total).filter(|i| !self.received.contains(i)).collect(),
            None => Vec::new(),
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if self.received.len() >= total as usize)
    }
}

/// Parameter download protocol
#[derive(Debug)]
pub struct ParamSync {
    phase: Phase,
    ledger: ParamLedger,
    table: ParamTable,
    max_retries: u32,
    /// Re-sends of `PARAM_REQUEST_LIST` while the total is still unknown
    list_retries: u32,
    queue: VecDeque<u16>,
}

impl ParamSync {
    /// Create an idle protocol with a per-index retry budget
    pub fn new(max_retries: u32) -> Self {
        Self {
            phase: Phase::Idle,
            ledger: ParamLedger::default(),
            table: ParamTable::default(),
            max_retries,
            list_retries: 0,
            queue: VecDeque::new(),
        }
    }

    /// Forget everything (new connection or disconnect)
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.ledger = ParamLedger::default();
        self.table.clear();
        self.list_retries = 0;
        self.queue.clear();
    }

    /// Begin a full download
    pub fn start(&mut self) -> Vec<SyncCommand> {
        self.reset();
        self.phase = Phase::Burst;
        debug!("Requesting full parameter list");
        vec![SyncCommand::RequestList, SyncCommand::ArmSettle]
    }

    pub fn ledger(&self) -> &ParamLedger {
        &self.ledger
    }

    pub fn table(&self) -> &ParamTable {
        &self.table
    }

    /// True once completion has been reported
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// True while a download is running
    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Burst | Phase::Retrying)
    }

    /// `(received, total)`; total is 0 until learned
    pub fn progress(&self) -> (usize, usize) {
        (
            self.ledger.received_count(),
            self.ledger.total.map_or(0, |t| t as usize),
        )
    }

    /// Record a `PARAM_VALUE`
    ///
    /// The table is always updated. The ledger only tracks indices inside the
    /// advertised range, so echoes carrying index `0xFFFF` refresh values
    /// without touching download state.
    pub fn on_value(&mut self, value: &ParamValue) -> Vec<SyncCommand> {
        self.table.insert(
            value.param_id.clone(),
            ParamEntry {
                value: value.param_value,
                param_type: value.param_type,
                index: value.param_index,
            },
        );

        if !self.is_active() {
            return Vec::new();
        }

        if self.ledger.total.is_none() && value.param_count > 0 {
            self.ledger.total = Some(value.param_count);
            info!("Vehicle reports {} parameters", value.param_count);
        }

        let in_range = matches!(self.ledger.total, Some(total) if value.param_index < total);
        if !in_range || !self.ledger.received.insert(value.param_index) {
            return Vec::new();
        }

        if self.ledger.is_complete() {
            return vec![self.complete()];
        }

        match self.phase {
            Phase::Burst => vec![SyncCommand::ArmSettle],
            _ => Vec::new(),
        }
    }

    /// Burst settle timer fired
    pub fn on_settle_elapsed(&mut self) -> Vec<SyncCommand> {
        if self.phase != Phase::Burst {
            return Vec::new();
        }

        if self.ledger.total.is_none() {
            if self.list_retries < self.max_retries {
                self.list_retries += 1;
                warn!("No parameter values received; re-requesting list (attempt {})", self.list_retries + 1);
                return vec![SyncCommand::RequestList, SyncCommand::ArmSettle];
            }
            warn!("Vehicle never answered the parameter list request");
            return vec![self.complete()];
        }

        self.begin_retry_pass()
    }

    /// Spacing timer fired: send the next queued request or start the grace wait
    pub fn on_spacing_elapsed(&mut self) -> Vec<SyncCommand> {
        if self.phase != Phase::Retrying {
            return Vec::new();
        }

        match self.queue.pop_front() {
            Some(index) => vec![SyncCommand::RequestIndex(index), SyncCommand::ArmSpacing],
            None => vec![SyncCommand::ArmGrace],
        }
    }

    /// Grace timer fired: re-evaluate after a retry pass
    pub fn on_grace_elapsed(&mut self) -> Vec<SyncCommand> {
        if self.phase != Phase::Retrying {
            return Vec::new();
        }
        self.begin_retry_pass()
    }

    fn begin_retry_pass(&mut self) -> Vec<SyncCommand> {
        let missing = self.ledger.missing();
        if missing.is_empty() {
            return vec![self.complete()];
        }

        let eligible: Vec<u16> = missing
            .into_iter()
            .filter(|i| self.ledger.retries(*i) < self.max_retries)
            .collect();

        if eligible.is_empty() {
            return vec![self.complete()];
        }

        debug!("Re-requesting {} missing parameters individually", eligible.len());
        for index in &eligible {
            *self.ledger.retries.entry(*index).or_insert(0) += 1;
        }

        self.phase = Phase::Retrying;
        self.queue = eligible.into();

        match self.queue.pop_front() {
            Some(index) => vec![SyncCommand::RequestIndex(index), SyncCommand::ArmSpacing],
            None => vec![SyncCommand::ArmGrace],
        }
    }

    fn complete(&mut self) -> SyncCommand {
        self.phase = Phase::Complete;
        self.queue.clear();

        let stragglers = self.ledger.missing();
        let (received, total) = self.progress();

        if stragglers.is_empty() {
            info!("Parameter download complete: {}/{}", received, total);
        } else {
            warn!(
                "Parameter download finished with {} stragglers: {}/{}",
                stragglers.len(),
                received,
                total
            );
        }

        SyncCommand::Complete(SyncSummary {
            received,
            total,
            stragglers,
        })
    }
}
