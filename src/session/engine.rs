//! Session actor
//!
//! One task owns every piece of session state. Its loop waits on four
//! inputs at once: bytes from the link, intents from handles, the earliest
//! armed timer and the exit of the link writer. Each wake-up is handled to
//! completion before the next, so protocol steps never interleave. Outbound
//! frames are only queued here; [`LinkWriter`] drains them, so a link that
//! stops accepting bytes cannot hold up the loop.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::streams::{self, StreamActivation, StreamCheck, StreamStep};
use super::timers::{TimerKind, Timers};
use super::writer::LinkWriter;
use super::{CommandRequest, Intent, SessionEvent, SessionPhase};
use crate::calibration::{self, ActiveCalibration, CalibrationKind, CompassProgress, CompassReport};
use crate::command::{AckResponder, PendingAcks};
use crate::config::Config;
use crate::error::{FlightLinkError, Result};
use crate::mavlink::messages::{
    CommandAck, CommandLong, Heartbeat, MagCalProgress, MagCalReport, ParamRequestList, ParamRequestRead,
    ParamSet, ParamValue, RequestDataStream, StatusText,
};
use crate::mavlink::protocol::{data_stream, mav_cmd, MAV_PARAM_TYPE_REAL32, MAV_TYPE_GCS};
use crate::mavlink::{Frame, MavResult, MavlinkEncoder, MavlinkParser, Message, MessageData, VehicleCategory};
use crate::params::write::WriteResponder;
use crate::params::{ParamEntry, ParamSync, PendingWrite, SyncCommand, SyncSummary};
use crate::serial::{BoxedLink, Connector};
use crate::telemetry::{decode_sys_status, FirmwareInfo, GpsFix, RcInput, VehicleIdentity, VehicleSnapshot};

/// Smallest read buffer regardless of configuration
const MIN_READ_BUFFER: usize = 64;

/// Work scheduled after parameters load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostConnectStep {
    ActivateStreams,
    RequestVersion,
    AutoBackup,
}

/// Why the actor woke up
enum Wake {
    Intent(Intent),
    Read(io::Result<usize>),
    WriterStopped(io::Error),
    Timer,
    HandlesDropped,
}

pub(super) struct Engine {
    config: Config,
    connector: Arc<dyn Connector>,
    intents: mpsc::Receiver<Intent>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<VehicleSnapshot>,

    phase: SessionPhase,
    link: Option<ReadHalf<BoxedLink>>,
    writer: Option<LinkWriter>,
    read_buf: Vec<u8>,
    parser: MavlinkParser,
    encoder: MavlinkEncoder,
    target: Option<VehicleIdentity>,
    timers: Timers,
    params: ParamSync,
    pending_write: Option<PendingWrite>,
    acks: PendingAcks,
    post_connect: VecDeque<PostConnectStep>,
    streams: StreamActivation,
    calibration: Option<ActiveCalibration>,
    /// Transport failure raised while handling the current wake-up
    fault: Option<String>,
}

impl Engine {
    pub(super) fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        intents: mpsc::Receiver<Intent>,
        events: broadcast::Sender<SessionEvent>,
        snapshot: watch::Sender<VehicleSnapshot>,
    ) -> Self {
        let read_buf = vec![0u8; config.serial.read_buffer_size.max(MIN_READ_BUFFER)];
        let encoder = MavlinkEncoder::new(config.link.system_id, config.link.component_id);
        let params = ParamSync::new(config.timing.param_max_retries);
        let streams = StreamActivation::new(config.timing.stream_max_attempts);

        Self {
            config,
            connector,
            intents,
            events,
            snapshot,
            phase: SessionPhase::Disconnected,
            link: None,
            writer: None,
            read_buf,
            parser: MavlinkParser::new(),
            encoder,
            target: None,
            timers: Timers::new(),
            params,
            pending_write: None,
            acks: PendingAcks::new(),
            post_connect: VecDeque::new(),
            streams,
            calibration: None,
            fault: None,
        }
    }

    /// Actor main loop; returns when every handle is gone
    pub(super) async fn run(mut self) {
        loop {
            let deadline = self.timers.next_deadline();

            let wake = tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(intent) => Wake::Intent(intent),
                    None => Wake::HandlesDropped,
                },
                result = read_link(self.link.as_mut(), &mut self.read_buf) => Wake::Read(result),
                result = writer_stopped(self.writer.as_mut()) => Wake::WriterStopped(result),
                _ = sleep_until_deadline(deadline) => Wake::Timer,
            };

            match wake {
                Wake::Intent(intent) => self.handle_intent(intent).await,
                Wake::Read(Ok(0)) => self.raise_fault("Link closed by peer".to_string()),
                Wake::Read(Ok(n)) => self.handle_bytes(n),
                Wake::Read(Err(e)) => self.raise_fault(format!("Link read failed: {}", e)),
                Wake::WriterStopped(e) => self.raise_fault(format!("Link write failed: {}", e)),
                Wake::Timer => self.handle_timers().await,
                Wake::HandlesDropped => break,
            }

            if let Some(reason) = self.fault.clone() {
                error!("Session lost: {}", reason);
                self.close_session(reason).await;
            }
        }

        if self.phase != SessionPhase::Disconnected {
            self.close_session("Session handle dropped".to_string()).await;
        }
        debug!("Session actor stopped");
    }

    // ==================== Intents ====================

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Connect { reply } => {
                let result = self.open_session().await;
                let _ = reply.send(result);
            }
            Intent::Disconnect { reply } => {
                if self.phase != SessionPhase::Disconnected {
                    self.close_session("Disconnected by user".to_string()).await;
                }
                let _ = reply.send(Ok(()));
            }
            Intent::WriteParam { name, value, reply } => self.start_write(name, value, reply),
            Intent::Command {
                request,
                responder,
                reply,
            } => {
                let result = self.send_command(request, responder);
                let _ = reply.send(result);
            }
            Intent::ConfirmAccelPosition { reply } => {
                let result = self.confirm_accel_position();
                let _ = reply.send(result);
            }
            Intent::CancelCalibration { reply } => {
                let result = self.cancel_calibration();
                let _ = reply.send(result);
            }
            Intent::RequestDataStream {
                stream_id,
                rate_hz,
                start,
                reply,
            } => {
                let result = self.request_data_stream(stream_id, rate_hz, start);
                let _ = reply.send(result);
            }
        }
    }

    async fn open_session(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Disconnected {
            return Err(FlightLinkError::AlreadyConnected);
        }

        let link = self.connector.open().await?;
        info!("Link open on {}", self.connector.describe());

        let (reader, writer) = tokio::io::split(link);
        self.link = Some(reader);
        self.writer = Some(LinkWriter::spawn(writer, self.config.timing.link_write_timeout()));
        self.parser.reset();
        self.encoder = MavlinkEncoder::new(self.config.link.system_id, self.config.link.component_id);
        self.snapshot.send_modify(|s| *s = VehicleSnapshot::default());
        self.set_phase(SessionPhase::Connecting);

        self.timers.arm(TimerKind::SelfHeartbeat, Duration::ZERO);
        self.timers
            .arm(TimerKind::ConnectTimeout, self.config.timing.connect_timeout());
        Ok(())
    }

    fn start_write(&mut self, name: String, value: f32, reply: WriteResponder) {
        if self.phase != SessionPhase::Connected {
            let _ = reply.send(Err(FlightLinkError::NotConnected));
            return;
        }
        if self.pending_write.is_some() {
            let _ = reply.send(Err(FlightLinkError::ParamWriteInProgress));
            return;
        }
        let Some(entry) = self.params.table().get(&name).copied() else {
            let _ = reply.send(Err(FlightLinkError::UnknownParameter(name)));
            return;
        };
        let value = if entry.kind().is_integer() && value.fract() != 0.0 {
            debug!("{} holds an integer; rounding {}", name, value);
            value.round()
        } else {
            value
        };

        debug!("Writing {} = {}", name, value);
        let write = PendingWrite::new(name, value, entry.param_type, self.config.timing.param_write_attempts, reply);
        let (system, component) = self.target_ids();
        let message = write.to_message(system, component);
        self.pending_write = Some(write);

        self.transmit(&message);
        self.timers
            .arm(TimerKind::ParamWrite, self.config.timing.param_write_timeout());
    }

    fn send_command(&mut self, request: CommandRequest, responder: Option<AckResponder>) -> Result<()> {
        if self.target.is_none() {
            return Err(FlightLinkError::NotConnected);
        }

        if let Some(responder) = responder {
            self.acks.register(request.command, responder);
            self.timers.arm(TimerKind::Command(request.command), request.timeout);
        }
        if let Some(kind) = request.calibration {
            info!("Starting {:?} calibration", kind);
            self.set_calibration(Some(ActiveCalibration::new(kind)));
        }

        debug!("Sending command {}", request.command);
        let message = self.command_long(request.command, request.params);
        self.transmit(&message);
        self.link_status()
    }

    fn confirm_accel_position(&mut self) -> Result<()> {
        if self.target.is_none() {
            return Err(FlightLinkError::NotConnected);
        }

        let (target_system, target_component) = self.target_ids();
        let ack = CommandAck {
            target_system,
            target_component,
            ..calibration::accel_confirm_ack()
        };
        debug!("Confirming accelerometer position");
        self.transmit(&ack);
        self.link_status()
    }

    fn cancel_calibration(&mut self) -> Result<()> {
        if self.target.is_none() {
            return Err(FlightLinkError::NotConnected);
        }

        let Some(active) = self.calibration else {
            return Ok(());
        };
        info!("Cancelling {:?} calibration", active.kind);

        let (start, _) = calibration::start_command(active.kind);
        if self.acks.cancel(start) {
            self.timers.cancel(TimerKind::Command(start));
        }
        if let Some((command, params)) = calibration::cancel_command(active.kind) {
            let message = self.command_long(command, params);
            self.transmit(&message);
        }
        self.set_calibration(None);
        self.link_status()
    }

    fn request_data_stream(&mut self, stream_id: u8, rate_hz: u16, start: bool) -> Result<()> {
        if self.target.is_none() {
            return Err(FlightLinkError::NotConnected);
        }

        let (target_system, target_component) = self.target_ids();
        let message = RequestDataStream {
            req_message_rate: rate_hz,
            target_system,
            target_component,
            req_stream_id: stream_id,
            start_stop: u8::from(start),
        };
        self.transmit(&message);
        self.link_status()
    }

    // ==================== Inbound ====================

    fn handle_bytes(&mut self, n: usize) {
        let frames = self.parser.push_collect(&self.read_buf[..n]);

        for frame in frames {
            self.dispatch(frame);
            if self.fault.is_some() || self.link.is_none() {
                break;
            }
        }

        let stats = self.parser.stats();
        self.snapshot.send_modify(|s| s.link = stats);
    }

    fn dispatch(&mut self, frame: Frame) {
        let message = Message::decode(frame.message_id, &frame.payload);

        if let Message::Heartbeat(heartbeat) = &message {
            self.on_heartbeat(&frame, heartbeat);
            return;
        }

        // Nothing but heartbeats matters until the vehicle is identified
        let Some(target) = self.target else {
            return;
        };
        if frame.system_id != target.system_id {
            return;
        }

        match message {
            Message::ParamValue(value) => self.on_param_value(value),
            Message::CommandAck(ack) => self.on_command_ack(&ack),
            Message::StatusText(text) => self.on_status_text(text),
            Message::SysStatus(status) => {
                let (battery, sensors) = decode_sys_status(&status);
                self.streams.mark_telemetry();
                self.snapshot.send_modify(|s| {
                    s.battery = Some(battery);
                    s.sensors = Some(sensors);
                });
            }
            Message::GpsRawInt(gps) => {
                let fix = GpsFix::from(&gps);
                self.streams.mark_telemetry();
                let had_fix = self.snapshot.borrow().gps.is_some_and(|g| g.has_3d_fix());
                if fix.has_3d_fix() != had_fix {
                    info!("GPS 3D fix {} ({} satellites)", if had_fix { "lost" } else { "acquired" }, fix.satellites);
                }
                self.snapshot.send_modify(|s| s.gps = Some(fix));
            }
            Message::RcChannels(rc) => self.on_rc_input(RcInput::from(&rc)),
            Message::RcChannelsRaw(rc) => self.on_rc_input(RcInput::from(&rc)),
            Message::AutopilotVersion(version) => {
                let firmware = FirmwareInfo::from(&version);
                info!(
                    "Firmware {}.{}.{}",
                    firmware.version.0, firmware.version.1, firmware.version.2
                );
                self.snapshot.send_modify(|s| s.firmware = Some(firmware));
                self.emit(SessionEvent::FirmwareDetected { firmware });
            }
            Message::MagCalProgress(progress) => self.on_compass_progress(&progress),
            Message::MagCalReport(report) => self.on_compass_report(&report),
            other => debug!("Ignoring message #{}", other.message_id()),
        }
    }

    fn on_heartbeat(&mut self, frame: &Frame, heartbeat: &Heartbeat) {
        if heartbeat.mav_type == MAV_TYPE_GCS || heartbeat.autopilot != self.config.link.target_autopilot {
            return;
        }

        match self.target {
            None => {
                if self.phase != SessionPhase::Connecting {
                    return;
                }

                let identity = VehicleIdentity {
                    system_id: frame.system_id,
                    component_id: frame.component_id,
                    autopilot: heartbeat.autopilot,
                    mav_type: heartbeat.mav_type,
                    category: VehicleCategory::from_mav_type(heartbeat.mav_type),
                };
                info!(
                    "Vehicle detected: system {} component {} ({:?}, MAVLink {:?})",
                    identity.system_id, identity.component_id, identity.category, frame.version
                );

                self.target = Some(identity);
                self.timers.cancel(TimerKind::ConnectTimeout);
                self.timers
                    .arm(TimerKind::HeartbeatWatchdog, self.config.timing.heartbeat_timeout());
                self.snapshot.send_modify(|s| {
                    s.identity = Some(identity);
                    s.apply_heartbeat(heartbeat);
                });
                self.emit(SessionEvent::VehicleDetected { identity });
                self.set_phase(SessionPhase::Loading);

                let commands = self.params.start();
                self.apply_sync(commands);
            }
            Some(target) if target.system_id == frame.system_id && target.component_id == frame.component_id => {
                self.timers
                    .arm(TimerKind::HeartbeatWatchdog, self.config.timing.heartbeat_timeout());
                self.snapshot.send_modify(|s| s.apply_heartbeat(heartbeat));
            }
            Some(_) => {}
        }
    }

    fn on_param_value(&mut self, value: ParamValue) {
        let was_downloading = self.params.is_active();
        let received_before = self.params.ledger().received_count();

        let commands = self.params.on_value(&value);

        let entry = ParamEntry {
            value: value.param_value,
            param_type: value.param_type,
            index: value.param_index,
        };
        let (received, total) = self.params.progress();
        let name = value.param_id.clone();
        self.snapshot.send_modify(|s| {
            s.params.insert(name, entry);
            s.param_progress = (received, total);
        });

        if received > received_before {
            self.emit(SessionEvent::ParamProgress { received, total });
        } else if !was_downloading && self.phase == SessionPhase::Connected {
            self.emit(SessionEvent::ParamUpdated {
                name: value.param_id.clone(),
                value: value.param_value,
            });
        }

        if self.pending_write.as_ref().is_some_and(|w| w.matches(&value)) {
            if let Some(write) = self.pending_write.take() {
                self.timers.cancel(TimerKind::ParamWrite);
                write.confirm(value.param_value);
            }
        }

        self.apply_sync(commands);
    }

    fn on_command_ack(&mut self, ack: &CommandAck) {
        let result = MavResult::from(ack.result);
        self.emit(SessionEvent::CommandAck {
            command: ack.command,
            result,
        });

        if self.acks.resolve(ack) {
            self.timers.cancel(TimerKind::Command(ack.command));
        }
        self.on_calibration_ack(ack.command, result);
    }

    fn on_calibration_ack(&mut self, command: u16, result: MavResult) {
        let Some(active) = self.calibration else {
            return;
        };
        let (start, _) = calibration::start_command(active.kind);
        if command != start || result == MavResult::InProgress {
            return;
        }

        // Compass runs continue after an accepted start; reports end them
        if active.kind != CalibrationKind::Compass || result != MavResult::Accepted {
            info!("{:?} calibration finished: {:?}", active.kind, result);
            self.set_calibration(None);
        }
    }

    fn on_status_text(&mut self, message: StatusText) {
        match message.severity {
            0..=3 => error!("Vehicle: {}", message.text),
            4 => warn!("Vehicle: {}", message.text),
            5 | 6 => info!("Vehicle: {}", message.text),
            _ => debug!("Vehicle: {}", message.text),
        }

        self.emit(SessionEvent::StatusText {
            severity: message.severity,
            text: message.text,
            timestamp: Utc::now(),
        });
    }

    fn on_rc_input(&mut self, rc: RcInput) {
        self.streams.mark_telemetry();
        self.snapshot.send_modify(|s| s.rc = Some(rc));
    }

    fn on_compass_progress(&mut self, message: &MagCalProgress) {
        if let Some(active) = self.calibration.as_mut() {
            active.on_progress(message);
        }

        let progress = CompassProgress::from(message);
        self.snapshot.send_modify(|s| s.apply_compass_progress(progress));
        self.emit(SessionEvent::CompassProgress { progress });
    }

    fn on_compass_report(&mut self, message: &MagCalReport) {
        let report = CompassReport::from(message);
        info!(
            "Compass {} calibration {:?} (fitness {:.1})",
            report.compass_id, report.status, report.fitness
        );
        self.emit(SessionEvent::CompassReport { report });

        let finished = match self.calibration.as_mut() {
            Some(active) if active.kind == CalibrationKind::Compass => active.on_report(message),
            _ => false,
        };
        if finished {
            self.set_calibration(None);
        }
    }

    // ==================== Parameter download ====================

    fn apply_sync(&mut self, commands: Vec<SyncCommand>) {
        let (target_system, target_component) = self.target_ids();

        for command in commands {
            match command {
                SyncCommand::RequestList => {
                    let message = ParamRequestList {
                        target_system,
                        target_component,
                    };
                    self.transmit(&message);
                }
                SyncCommand::RequestIndex(index) => match i16::try_from(index) {
                    Ok(param_index) => {
                        let message = ParamRequestRead {
                            param_index,
                            target_system,
                            target_component,
                            param_id: String::new(),
                        };
                        self.transmit(&message);
                    }
                    Err(_) => warn!("Parameter index {} cannot be requested individually", index),
                },
                SyncCommand::ArmSettle => {
                    self.timers.arm(TimerKind::ParamSettle, self.config.timing.param_settle())
                }
                SyncCommand::ArmSpacing => self
                    .timers
                    .arm(TimerKind::ParamRetrySpacing, self.config.timing.param_retry_spacing()),
                SyncCommand::ArmGrace => self
                    .timers
                    .arm(TimerKind::ParamRetryGrace, self.config.timing.param_retry_grace()),
                SyncCommand::Complete(summary) => self.on_params_loaded(summary),
            }
        }
    }

    fn on_params_loaded(&mut self, summary: SyncSummary) {
        self.timers.cancel_where(TimerKind::is_param_sync);

        let table = self.params.table().clone();
        let progress = self.params.progress();
        self.snapshot.send_modify(|s| {
            s.params = table;
            s.param_progress = progress;
        });
        self.emit(SessionEvent::ParamsLoaded { summary });

        if self.phase == SessionPhase::Loading {
            self.set_phase(SessionPhase::Connected);

            self.post_connect.clear();
            self.post_connect.push_back(PostConnectStep::ActivateStreams);
            self.post_connect.push_back(PostConnectStep::RequestVersion);
            if self.config.streams.auto_backup {
                self.post_connect.push_back(PostConnectStep::AutoBackup);
            }
            self.timers
                .arm(TimerKind::PostConnect, self.config.timing.post_connect_step());
        }
    }

    // ==================== Timers ====================

    async fn handle_timers(&mut self) {
        for kind in self.timers.pop_due(Instant::now()) {
            if self.link.is_none() || self.fault.is_some() {
                break;
            }
            self.on_timer(kind).await;
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::SelfHeartbeat => {
                self.transmit(&Heartbeat::ground_station());
                self.timers
                    .arm(TimerKind::SelfHeartbeat, self.config.timing.heartbeat_interval());
            }
            TimerKind::ConnectTimeout => {
                let reason = format!(
                    "No vehicle heartbeat within {:.1}s",
                    self.config.timing.connect_timeout().as_secs_f32()
                );
                warn!("{}", reason);
                self.close_session(reason).await;
            }
            TimerKind::HeartbeatWatchdog => {
                let reason = format!(
                    "Vehicle heartbeat lost for {:.1}s",
                    self.config.timing.heartbeat_timeout().as_secs_f32()
                );
                warn!("{}", reason);
                self.close_session(reason).await;
            }
            TimerKind::ParamSettle => {
                let commands = self.params.on_settle_elapsed();
                self.apply_sync(commands);
            }
            TimerKind::ParamRetrySpacing => {
                let commands = self.params.on_spacing_elapsed();
                self.apply_sync(commands);
            }
            TimerKind::ParamRetryGrace => {
                let commands = self.params.on_grace_elapsed();
                self.apply_sync(commands);
            }
            TimerKind::ParamWrite => self.on_write_timeout(),
            TimerKind::Command(command) => {
                if self.acks.expire(command) {
                    self.on_calibration_ack(command, MavResult::Failed);
                }
            }
            TimerKind::PostConnect => {
                if let Some(step) = self.post_connect.pop_front() {
                    self.run_post_connect(step);
                }
                if !self.post_connect.is_empty() {
                    self.timers
                        .arm(TimerKind::PostConnect, self.config.timing.post_connect_step());
                }
            }
            TimerKind::StreamStep => {
                if let Some(step) = self.streams.next_step() {
                    self.run_stream_step(step);
                }
                self.schedule_stream_activation();
            }
            TimerKind::StreamCheck => match self.streams.check() {
                StreamCheck::Retry(step) => {
                    self.run_stream_step(step);
                    self.schedule_stream_activation();
                }
                StreamCheck::Abandoned(attempts) => {
                    self.emit(SessionEvent::StreamActivationAbandoned { attempts });
                }
                StreamCheck::Satisfied | StreamCheck::Idle => {}
            },
        }
    }

    fn on_write_timeout(&mut self) {
        let (target_system, target_component) = self.target_ids();

        let Some(write) = self.pending_write.as_mut() else {
            return;
        };
        if !write.on_timeout() {
            if let Some(write) = self.pending_write.take() {
                write.fail();
            }
            return;
        }
        let resend = write.to_message(target_system, target_component);

        self.transmit(&resend);
        self.timers
            .arm(TimerKind::ParamWrite, self.config.timing.param_write_timeout());
    }

    // ==================== Post-connect ====================

    fn run_post_connect(&mut self, step: PostConnectStep) {
        match step {
            PostConnectStep::ActivateStreams => {
                if let Some(first) = self.streams.begin() {
                    self.run_stream_step(first);
                    self.schedule_stream_activation();
                }
            }
            PostConnectStep::RequestVersion => {
                debug!("Requesting autopilot version");
                let message = self.command_long(
                    mav_cmd::REQUEST_AUTOPILOT_CAPABILITIES,
                    [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                );
                self.transmit(&message);
            }
            PostConnectStep::AutoBackup => {
                let param_count = self.params.table().len();
                info!("Auto-backup requested for {} parameters", param_count);
                self.emit(SessionEvent::AutoBackupRequested { param_count });
            }
        }
    }

    fn schedule_stream_activation(&mut self) {
        if self.streams.has_pending_steps() {
            self.timers.arm(TimerKind::StreamStep, self.config.timing.stream_step());
        } else if self.streams.is_active() {
            let wait = if self.streams.attempt() <= 1 {
                self.config.timing.stream_grace()
            } else {
                self.config.timing.stream_retry_interval()
            };
            self.timers.arm(TimerKind::StreamCheck, wait);
        }
    }

    fn run_stream_step(&mut self, step: StreamStep) {
        let (target_system, target_component) = self.target_ids();
        let rate_hz = self.config.streams.rate_hz;

        match step {
            StreamStep::LegacyRates => {
                let writes: Vec<ParamSet> = streams::legacy_rate_params(self.params.table())
                    .into_iter()
                    .map(|name| {
                        let param_type = self
                            .params
                            .table()
                            .get(&name)
                            .map_or(MAV_PARAM_TYPE_REAL32, |e| e.param_type);
                        ParamSet {
                            param_value: rate_hz as f32,
                            target_system,
                            target_component,
                            param_id: name,
                            param_type,
                        }
                    })
                    .collect();
                debug!("Setting {} legacy stream rates to {} Hz", writes.len(), rate_hz);
                for message in &writes {
                    self.transmit(message);
                }
            }
            StreamStep::RequestAllStreams => {
                let message = RequestDataStream {
                    req_message_rate: rate_hz,
                    target_system,
                    target_component,
                    req_stream_id: data_stream::ALL,
                    start_stop: 1,
                };
                self.transmit(&message);
            }
            StreamStep::MessageIntervals => {
                let interval = streams::interval_us(rate_hz);
                for message_id in streams::INTERVAL_MESSAGES {
                    let message = self.command_long(
                        mav_cmd::SET_MESSAGE_INTERVAL,
                        [message_id as f32, interval, 0.0, 0.0, 0.0, 0.0, 0.0],
                    );
                    self.transmit(&message);
                }
            }
        }
    }

    // ==================== Teardown ====================

    async fn close_session(&mut self, reason: String) {
        self.link = None;
        if let Some(writer) = self.writer.take() {
            writer.close().await;
        }

        self.timers.clear();
        self.acks.clear();
        if let Some(write) = self.pending_write.take() {
            debug!("Abandoning write of {}", write.name());
            let error = match self.fault.take() {
                Some(fault) => FlightLinkError::Serial(fault),
                None => FlightLinkError::NotConnected,
            };
            write.abort(error);
        }
        self.params.reset();
        self.streams.reset();
        self.post_connect.clear();
        self.calibration = None;
        self.target = None;
        let link_stats = self.parser.stats();
        self.parser.reset();
        self.fault = None;

        info!("Session closed: {}", reason);
        let last = reason.clone();
        self.snapshot.send_modify(|s| {
            *s = VehicleSnapshot {
                last_disconnect: Some(last),
                link: link_stats,
                ..VehicleSnapshot::default()
            }
        });
        self.set_phase(SessionPhase::Disconnected);
        self.emit(SessionEvent::Disconnected { reason });
    }

    // ==================== Helpers ====================

    /// Encode one message and queue it for the writer; failures become the session fault
    fn transmit<M: MessageData>(&mut self, message: &M) {
        if self.fault.is_some() {
            return;
        }
        let Some(writer) = self.writer.as_ref() else {
            return;
        };

        let frame = self.encoder.encode(message);
        if let Err(reason) = writer.send(frame) {
            self.raise_fault(reason);
        }
    }

    fn raise_fault(&mut self, reason: String) {
        self.fault.get_or_insert(reason);
    }

    fn link_status(&self) -> Result<()> {
        match &self.fault {
            Some(reason) => Err(FlightLinkError::Serial(reason.clone())),
            None if self.link.is_none() => Err(FlightLinkError::NotConnected),
            None => Ok(()),
        }
    }

    fn target_ids(&self) -> (u8, u8) {
        self.target
            .map_or((0, 0), |t| (t.system_id, t.component_id))
    }

    fn command_long(&self, command: u16, params: [f32; 7]) -> CommandLong {
        let (target_system, target_component) = self.target_ids();
        CommandLong {
            params,
            command,
            target_system,
            target_component,
            confirmation: 0,
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase == phase {
            return;
        }
        info!("Session phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.snapshot.send_modify(|s| s.phase = phase);
        self.emit(SessionEvent::PhaseChanged { phase });
    }

    fn set_calibration(&mut self, calibration: Option<ActiveCalibration>) {
        self.calibration = calibration;
        let active = calibration.map(|c| c.kind);
        self.snapshot.send_modify(|s| {
            s.calibration.active = active;
            if active.is_none() || active == Some(CalibrationKind::Compass) {
                s.calibration.compass.clear();
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

async fn read_link(link: Option<&mut ReadHalf<BoxedLink>>, buf: &mut [u8]) -> io::Result<usize> {
    match link {
        Some(link) => link.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn writer_stopped(writer: Option<&mut LinkWriter>) -> io::Error {
    match writer {
        Some(writer) => writer.stopped().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
