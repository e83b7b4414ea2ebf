//! Telemetry stream activation
//!
//! Vehicles differ in which mechanism they honour, so every activation runs
//! all three in order, spaced by a short step delay:
//!
//! 1. Legacy per-port rate parameters (`SRn_*`), only those the vehicle has
//! 2. `REQUEST_DATA_STREAM` for all streams, repeated
//! 3. `SET_MESSAGE_INTERVAL` for each telemetry message
//!
//! After a grace window without telemetry the whole sequence is re-run on a
//! fixed schedule, up to a bounded number of attempts.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::params::ParamTable;

/// Serial port prefixes of the legacy stream-rate parameters
pub const LEGACY_PORT_PREFIXES: [&str; 3] = ["SR0_", "SR1_", "SR2_"];

/// Stream groups with a legacy rate parameter per port
pub const LEGACY_STREAM_SUFFIXES: [&str; 8] = [
    "RAW_SENS", "EXT_STAT", "RC_CHAN", "RAW_CTRL", "POSITION", "EXTRA1", "EXTRA2", "EXTRA3",
];

/// Times the all-streams request is sent per attempt
pub const REQUEST_REPEATS: usize = 3;

/// Messages requested by interval: SYS_STATUS, GPS_RAW_INT, ATTITUDE,
/// GLOBAL_POSITION_INT, RC_CHANNELS, VFR_HUD
pub const INTERVAL_MESSAGES: [u32; 6] = [1, 24, 30, 33, 65, 74];

/// One activation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStep {
    LegacyRates,
    RequestAllStreams,
    MessageIntervals,
}

/// Result of a stream check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCheck {
    /// Telemetry is flowing
    Satisfied,
    /// Re-run the sequence starting with this step
    Retry(StreamStep),
    /// Out of attempts
    Abandoned(u32),
    /// Activation not running
    Idle,
}

/// Legacy rate parameters present in the vehicle's catalog
pub fn legacy_rate_params(table: &ParamTable) -> Vec<String> {
    LEGACY_PORT_PREFIXES
        .iter()
        .flat_map(|prefix| LEGACY_STREAM_SUFFIXES.iter().map(move |suffix| format!("{}{}", prefix, suffix)))
        .filter(|name| table.contains(name))
        .collect()
}

/// Interval in microseconds for a rate in Hz
pub fn interval_us(rate_hz: u16) -> f32 {
    1_000_000.0 / rate_hz.max(1) as f32
}

fn plan() -> VecDeque<StreamStep> {
    let mut steps = VecDeque::with_capacity(2 + REQUEST_REPEATS);
    steps.push_back(StreamStep::LegacyRates);
    for _ in 0..REQUEST_REPEATS {
        steps.push_back(StreamStep::RequestAllStreams);
    }
    steps.push_back(StreamStep::MessageIntervals);
    steps
}

/// Activation progress for one session
#[derive(Debug)]
pub struct StreamActivation {
    queue: VecDeque<StreamStep>,
    attempt: u32,
    max_attempts: u32,
    telemetry_seen: bool,
    active: bool,
}

impl StreamActivation {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            attempt: 0,
            max_attempts: max_attempts.max(1),
            telemetry_seen: false,
            active: false,
        }
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.attempt = 0;
        self.telemetry_seen = false;
        self.active = false;
    }

    /// Start the first attempt; returns the first step to run
    pub fn begin(&mut self) -> Option<StreamStep> {
        self.queue = plan();
        self.attempt = 1;
        self.active = true;
        info!("Activating telemetry streams");
        self.queue.pop_front()
    }

    /// Next step of the current attempt
    pub fn next_step(&mut self) -> Option<StreamStep> {
        self.queue.pop_front()
    }

    /// Whether the current attempt has steps left
    pub fn has_pending_steps(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Attempt currently running (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Note that a telemetry message arrived
    pub fn mark_telemetry(&mut self) {
        self.telemetry_seen = true;
    }

    /// Grace or retry timer fired
    pub fn check(&mut self) -> StreamCheck {
        if !self.active {
            return StreamCheck::Idle;
        }

        if self.telemetry_seen {
            debug!("Telemetry flowing after {} activation attempt(s)", self.attempt);
            self.active = false;
            return StreamCheck::Satisfied;
        }

        if self.attempt >= self.max_attempts {
            warn!("No telemetry after {} stream activation attempts; giving up", self.attempt);
            self.active = false;
            return StreamCheck::Abandoned(self.attempt);
        }

        self.attempt += 1;
        self.queue = plan();
        debug!("No telemetry yet; stream activation attempt {}", self.attempt);
        match self.queue.pop_front() {
            Some(step) => StreamCheck::Retry(step),
            None => StreamCheck::Idle,
        }
    }
}
