//! End-to-end session tests against a simulated vehicle
//!
//! The vehicle speaks MAVLink 2 over an in-memory duplex pipe. Tests run on a
//! paused clock, so protocol timeouts elapse instantly once every task is idle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use flight_link::command::CommandReply;
use flight_link::config::Config;
use flight_link::error::FlightLinkError;
use flight_link::mavlink::messages::{
    CommandAck, CommandLong, Heartbeat, MagCalProgress, ParamRequestList, ParamRequestRead, ParamSet, ParamValue,
    StatusText, SysStatus,
};
use flight_link::mavlink::protocol::mav_cmd;
use flight_link::mavlink::{MavResult, MavlinkEncoder, MavlinkParser, Message, MessageData, VehicleCategory};
use flight_link::serial::PreopenedConnector;
use flight_link::session::{self, SessionEvent, SessionHandle, SessionPhase};

const VEHICLE_SYSTEM: u8 = 1;
const VEHICLE_COMPONENT: u8 = 1;

// ==================== Simulated vehicle ====================

struct VehicleTx {
    writer: WriteHalf<DuplexStream>,
    encoder: MavlinkEncoder,
}

#[derive(Clone)]
struct VehicleSender(Arc<Mutex<VehicleTx>>);

impl VehicleSender {
    async fn send<M: MessageData>(&self, message: &M) -> std::io::Result<()> {
        let mut tx = self.0.lock().await;
        let bytes = tx.encoder.encode(message);
        tx.writer.write_all(&bytes).await
    }
}

struct SimVehicle {
    reader: ReadHalf<DuplexStream>,
    parser: MavlinkParser,
    inbox: VecDeque<Message>,
    tx: VehicleSender,
    heartbeats: Option<JoinHandle<()>>,
}

impl SimVehicle {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            parser: MavlinkParser::new(),
            inbox: VecDeque::new(),
            tx: VehicleSender(Arc::new(Mutex::new(VehicleTx {
                writer,
                encoder: MavlinkEncoder::new(VEHICLE_SYSTEM, VEHICLE_COMPONENT),
            }))),
            heartbeats: None,
        }
    }

    async fn send<M: MessageData>(&self, message: &M) {
        self.tx.send(message).await.unwrap();
    }

    /// Keep the session's watchdog fed once per second
    fn start_heartbeats(&mut self) {
        let tx = self.tx.clone();
        self.heartbeats = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if tx.send(&copter_heartbeat()).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_heartbeats(&mut self) {
        if let Some(task) = self.heartbeats.take() {
            task.abort();
        }
    }

    /// Next message from the ground station
    async fn next(&mut self) -> Message {
        loop {
            if let Some(message) = self.inbox.pop_front() {
                return message;
            }

            let mut buf = [0u8; 1024];
            let n = self.reader.read(&mut buf).await.unwrap();
            assert!(n > 0, "ground station closed the link");

            for frame in self.parser.push_collect(&buf[..n]) {
                assert_eq!(frame.system_id, 255);
                assert_eq!(frame.component_id, 190);
                self.inbox.push_back(Message::decode(frame.message_id, &frame.payload));
            }
        }
    }

    /// Skip messages until `select` accepts one
    async fn expect<T, F>(&mut self, mut select: F) -> T
    where
        F: FnMut(Message) -> Option<T>,
    {
        loop {
            if let Some(found) = select(self.next().await) {
                return found;
            }
        }
    }

    async fn expect_param_set(&mut self, name: &str) -> ParamSet {
        self.expect(|m| match m {
            Message::ParamSet(set) if set.param_id == name => Some(set),
            _ => None,
        })
        .await
    }

    async fn expect_command(&mut self, command: u16) -> CommandLong {
        self.expect(|m| match m {
            Message::CommandLong(cmd) if cmd.command == command => Some(cmd),
            _ => None,
        })
        .await
    }

    async fn send_param(&self, name: &str, value: f32, index: u16, count: u16) {
        self.send(&ParamValue {
            param_value: value,
            param_count: count,
            param_index: index,
            param_id: name.to_string(),
            param_type: 9,
        })
        .await;
    }

    async fn ack(&self, command: u16, result: u8) {
        self.send(&CommandAck::new(command, result)).await;
    }
}

fn copter_heartbeat() -> Heartbeat {
    Heartbeat {
        custom_mode: 0,
        mav_type: 2,
        autopilot: 3,
        base_mode: 0x01,
        system_status: 3,
        mavlink_version: 3,
    }
}

fn start() -> (SessionHandle, SimVehicle) {
    start_with_pipe(64 * 1024)
}

/// Session over a pipe holding at most `capacity` unread bytes each way
fn start_with_pipe(capacity: usize) -> (SessionHandle, SimVehicle) {
    let (ours, theirs) = tokio::io::duplex(capacity);
    let connector = Arc::new(PreopenedConnector::new(Box::new(ours), "sim"));
    let session = session::spawn(Config::default(), connector);
    (session, SimVehicle::new(theirs))
}

/// Handshake and full download of `params`
async fn connected(params: &[(&str, f32)]) -> (SessionHandle, SimVehicle) {
    connected_with_pipe(64 * 1024, params).await
}

async fn connected_with_pipe(capacity: usize, params: &[(&str, f32)]) -> (SessionHandle, SimVehicle) {
    let (session, mut vehicle) = start_with_pipe(capacity);
    session.connect().await.unwrap();

    vehicle
        .expect(|m| matches!(m, Message::Heartbeat(hb) if hb.mav_type == 6).then_some(()))
        .await;
    vehicle.send(&copter_heartbeat()).await;
    vehicle.start_heartbeats();

    vehicle
        .expect(|m| match m {
            Message::ParamRequestList(req) => Some(req),
            _ => None,
        })
        .await;

    let count = params.len() as u16;
    for (index, (name, value)) in params.iter().enumerate() {
        vehicle.send_param(name, *value, index as u16, count).await;
    }

    session.wait_for_phase(SessionPhase::Connected).await.unwrap();
    (session, vehicle)
}

fn sample_params() -> Vec<(&'static str, f32)> {
    vec![
        ("ARMING_CHECK", 1.0),
        ("BATT_CAPACITY", 3300.0),
        ("FRAME_CLASS", 1.0),
        ("RATE_RLL_P", 0.135),
    ]
}

// ==================== Handshake ====================

#[tokio::test(start_paused = true)]
async fn test_handshake_reaches_connected() {
    let (session, mut vehicle) = start();
    let mut events = session.subscribe();
    session.connect().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Connecting);

    vehicle
        .expect(|m| matches!(m, Message::Heartbeat(hb) if hb.mav_type == 6).then_some(()))
        .await;
    vehicle.send(&copter_heartbeat()).await;

    let request: ParamRequestList = vehicle
        .expect(|m| match m {
            Message::ParamRequestList(req) => Some(req),
            _ => None,
        })
        .await;
    assert_eq!(request.target_system, VEHICLE_SYSTEM);
    assert_eq!(request.target_component, VEHICLE_COMPONENT);
    assert_eq!(session.phase(), SessionPhase::Loading);

    vehicle.send_param("ARMING_CHECK", 1.0, 0, 2).await;
    vehicle.send_param("FRAME_CLASS", 1.0, 1, 2).await;
    session.wait_for_phase(SessionPhase::Connected).await.unwrap();

    let snapshot = session.snapshot();
    let identity = snapshot.identity.unwrap();
    assert_eq!(identity.system_id, VEHICLE_SYSTEM);
    assert_eq!(identity.category, VehicleCategory::Copter);
    assert_eq!(snapshot.params.len(), 2);
    assert_eq!(snapshot.param_progress, (2, 2));
    assert!(!snapshot.armed);

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::PhaseChanged { phase } = event {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![SessionPhase::Connecting, SessionPhase::Loading, SessionPhase::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_rejected() {
    let (session, _vehicle) = start();
    session.connect().await.unwrap();
    assert!(matches!(session.connect().await, Err(FlightLinkError::AlreadyConnected)));
}

#[tokio::test(start_paused = true)]
async fn test_gcs_heartbeats_do_not_identify_vehicle() {
    let (session, vehicle) = start();
    session.connect().await.unwrap();

    vehicle.send(&Heartbeat::ground_station()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.phase(), SessionPhase::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_without_heartbeat() {
    let (session, _vehicle) = start();
    session.connect().await.unwrap();

    session.wait_for_phase(SessionPhase::Disconnected).await.unwrap();
    let reason = session.snapshot().last_disconnect.unwrap();
    assert!(reason.contains("No vehicle heartbeat"), "reason: {}", reason);
}

#[tokio::test(start_paused = true)]
async fn test_later_heartbeats_do_not_rerun_post_connect() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let rerun = timeout(
        Duration::from_secs(10),
        vehicle.expect(|m| matches!(m, Message::ParamRequestList(_)).then_some(())),
    )
    .await;
    assert!(rerun.is_err(), "parameter list requested again");
    assert_eq!(session.phase(), SessionPhase::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_armed_state_follows_heartbeat() {
    let (session, vehicle) = connected(&sample_params()).await;
    let mut watch = session.watch();

    vehicle
        .send(&Heartbeat {
            base_mode: 0x81,
            custom_mode: 5,
            ..copter_heartbeat()
        })
        .await;

    let snapshot = watch.wait_for(|s| s.armed).await.unwrap().clone();
    assert_eq!(snapshot.custom_mode, 5);
}

// ==================== Watchdog / teardown ====================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_loss_forces_disconnect() {
    let (session, mut vehicle) = connected(&sample_params()).await;
    let mut events = session.subscribe();

    vehicle.stop_heartbeats();
    session.wait_for_phase(SessionPhase::Disconnected).await.unwrap();

    let snapshot = session.snapshot();
    assert!(snapshot.last_disconnect.unwrap().contains("heartbeat lost"));
    assert!(snapshot.params.is_empty());
    assert!(snapshot.identity.is_none());

    let mut saw_disconnect = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Disconnected { .. }) {
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect);
}

#[tokio::test(start_paused = true)]
async fn test_link_closed_by_peer() {
    let (session, vehicle) = start();
    session.connect().await.unwrap();

    drop(vehicle);
    session.wait_for_phase(SessionPhase::Disconnected).await.unwrap();
    let reason = session.snapshot().last_disconnect.unwrap();
    assert!(reason.starts_with("Link"), "reason: {}", reason);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_command() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.reboot().await })
    };
    vehicle.expect_command(mav_cmd::PREFLIGHT_REBOOT_SHUTDOWN).await;

    session.disconnect().await.unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), CommandReply::Cancelled);
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_intents_require_connection() {
    let (session, _vehicle) = start();

    assert!(matches!(
        session.write_param("ARMING_CHECK", 0.0).await,
        Err(FlightLinkError::NotConnected)
    ));
    assert!(matches!(session.reboot().await, Err(FlightLinkError::NotConnected)));
    assert!(matches!(
        session.confirm_accel_position().await,
        Err(FlightLinkError::NotConnected)
    ));
}

// ==================== Parameter download ====================

#[tokio::test(start_paused = true)]
async fn test_lost_indices_recovered_individually() {
    let (session, mut vehicle) = start();
    let mut events = session.subscribe();
    session.connect().await.unwrap();
    vehicle.send(&copter_heartbeat()).await;
    vehicle.start_heartbeats();
    vehicle
        .expect(|m| matches!(m, Message::ParamRequestList(_)).then_some(()))
        .await;

    let count = 10u16;
    for index in (0..count).filter(|i| *i != 2 && *i != 7) {
        vehicle.send_param(&format!("P{}", index), index as f32, index, count).await;
    }

    // After the burst settles, only the missing indices are requested
    let mut requested = Vec::new();
    while requested.len() < 2 {
        let req: ParamRequestRead = vehicle
            .expect(|m| match m {
                Message::ParamRequestRead(req) => Some(req),
                _ => None,
            })
            .await;
        requested.push(req.param_index);
        let index = req.param_index as u16;
        vehicle.send_param(&format!("P{}", index), index as f32, index, count).await;
    }
    requested.sort_unstable();
    assert_eq!(requested, vec![2, 7]);

    session.wait_for_phase(SessionPhase::Connected).await.unwrap();
    assert_eq!(session.snapshot().params.len(), 10);

    let mut loaded = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ParamsLoaded { summary } = event {
            loaded = Some(summary);
        }
    }
    let summary = loaded.unwrap();
    assert_eq!(summary.received, 10);
    assert!(summary.stragglers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dead_index_retried_within_budget_then_accepted() {
    let (session, mut vehicle) = start();
    session.connect().await.unwrap();
    vehicle.send(&copter_heartbeat()).await;
    vehicle.start_heartbeats();
    vehicle
        .expect(|m| matches!(m, Message::ParamRequestList(_)).then_some(()))
        .await;

    vehicle.send_param("P0", 0.0, 0, 3).await;
    vehicle.send_param("P2", 2.0, 2, 3).await;

    let mut requests_for_dead = 0;
    let mut watch = session.watch();
    loop {
        tokio::select! {
            message = vehicle.next() => {
                if let Message::ParamRequestRead(req) = message {
                    assert_eq!(req.param_index, 1);
                    requests_for_dead += 1;
                }
            }
            _ = watch.wait_for(|s| s.phase == SessionPhase::Connected) => break,
        }
    }

    assert_eq!(requests_for_dead, 3);
    assert_eq!(session.snapshot().param_progress, (2, 3));
}

#[tokio::test(start_paused = true)]
async fn test_link_statistics_kept_after_disconnect() {
    let (session, _vehicle) = connected(&sample_params()).await;
    session.disconnect().await.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Disconnected);
    // One heartbeat and four parameter values at least
    assert!(snapshot.link.v2_frames >= 5, "stats: {:?}", snapshot.link);
    assert!(snapshot.link.bytes_processed > 0);
    assert_eq!(snapshot.link.checksum_failures, 0);
}

// ==================== Stalled link ====================

#[tokio::test(start_paused = true)]
async fn test_disconnect_completes_while_peer_stops_reading() {
    let (session, _vehicle) = start_with_pipe(64);
    session.connect().await.unwrap();

    // Three self-heartbeats fill the pipe; the fourth blocks mid-frame
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(session.phase(), SessionPhase::Connecting);

    timeout(Duration::from_secs(5), session.disconnect())
        .await
        .expect("disconnect stuck behind a blocked write")
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_write_ends_session() {
    let (session, _vehicle) = start_with_pipe(64);
    session.connect().await.unwrap();

    session.wait_for_phase(SessionPhase::Disconnected).await.unwrap();
    let reason = session.snapshot().last_disconnect.unwrap();
    assert!(reason.starts_with("Link write failed"), "reason: {}", reason);
}

#[tokio::test(start_paused = true)]
async fn test_write_cut_short_by_blocked_link_reports_transport_error() {
    let (session, _vehicle) = connected_with_pipe(128, &sample_params()).await;

    // The vehicle never reads again; stream setup and heartbeats fill the pipe
    match session.write_param("RATE_RLL_P", 0.14).await {
        Err(FlightLinkError::Serial(reason)) => {
            assert!(reason.starts_with("Link write failed"), "reason: {}", reason)
        }
        other => panic!("Expected Serial error, got: {:?}", other),
    }
    session.wait_for_phase(SessionPhase::Disconnected).await.unwrap();
}

// ==================== Parameter writes ====================

#[tokio::test(start_paused = true)]
async fn test_integer_parameter_write_is_rounded() {
    let (session, mut vehicle) = connected(&sample_params()).await;
    let mut watch = session.watch();

    vehicle
        .send(&ParamValue {
            param_value: 57.0,
            param_count: 4,
            param_index: u16::MAX,
            param_id: "SERIAL1_BAUD".to_string(),
            param_type: 6,
        })
        .await;
    watch.wait_for(|s| s.params.contains("SERIAL1_BAUD")).await.unwrap();

    let writer = {
        let session = session.clone();
        tokio::spawn(async move { session.write_param("SERIAL1_BAUD", 115.4).await })
    };

    let set = vehicle.expect_param_set("SERIAL1_BAUD").await;
    assert_eq!(set.param_value, 115.0);
    assert_eq!(set.param_type, 6);

    vehicle
        .send(&ParamValue {
            param_value: 115.0,
            param_count: 4,
            param_index: u16::MAX,
            param_id: "SERIAL1_BAUD".to_string(),
            param_type: 6,
        })
        .await;
    assert_eq!(writer.await.unwrap().unwrap(), 115.0);
}

#[tokio::test(start_paused = true)]
async fn test_write_confirmed_by_echo_value() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let writer = {
        let session = session.clone();
        tokio::spawn(async move { session.write_param("BATT_CAPACITY", 5000.7).await })
    };

    let set = vehicle.expect_param_set("BATT_CAPACITY").await;
    assert_eq!(set.param_value, 5000.7);
    assert_eq!(set.target_system, VEHICLE_SYSTEM);
    // The vehicle rounds before echoing
    vehicle.send_param("BATT_CAPACITY", 5001.0, 1, 4).await;

    assert_eq!(writer.await.unwrap().unwrap(), 5001.0);
    assert_eq!(session.snapshot().params.value("BATT_CAPACITY"), Some(5001.0));
}

#[tokio::test(start_paused = true)]
async fn test_write_fails_after_three_attempts() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let writer = {
        let session = session.clone();
        tokio::spawn(async move { session.write_param("RATE_RLL_P", 0.2).await })
    };

    for _ in 0..3 {
        vehicle.expect_param_set("RATE_RLL_P").await;
    }

    match writer.await.unwrap() {
        Err(FlightLinkError::ParamWriteFailed { name, attempts }) => {
            assert_eq!(name, "RATE_RLL_P");
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected ParamWriteFailed, got: {:?}", other),
    }

    let fourth = timeout(Duration::from_secs(4), vehicle.expect_param_set("RATE_RLL_P")).await;
    assert!(fourth.is_err(), "write was attempted a fourth time");
}

#[tokio::test(start_paused = true)]
async fn test_write_succeeds_on_second_attempt() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let writer = {
        let session = session.clone();
        tokio::spawn(async move { session.write_param("ARMING_CHECK", 0.0).await })
    };

    vehicle.expect_param_set("ARMING_CHECK").await;
    vehicle.expect_param_set("ARMING_CHECK").await;
    vehicle.send_param("ARMING_CHECK", 0.0, 0, 4).await;

    assert_eq!(writer.await.unwrap().unwrap(), 0.0);

    let third = timeout(Duration::from_secs(4), vehicle.expect_param_set("ARMING_CHECK")).await;
    assert!(third.is_err(), "write was attempted a third time");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_write_rejected() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let _first = {
        let session = session.clone();
        tokio::spawn(async move { session.write_param("ARMING_CHECK", 0.0).await })
    };
    vehicle.expect_param_set("ARMING_CHECK").await;

    assert!(matches!(
        session.write_param("FRAME_CLASS", 2.0).await,
        Err(FlightLinkError::ParamWriteInProgress)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_parameter_rejected() {
    let (session, _vehicle) = connected(&sample_params()).await;
    assert!(matches!(
        session.write_param("NOT_A_PARAM", 1.0).await,
        Err(FlightLinkError::UnknownParameter(name)) if name == "NOT_A_PARAM"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_write_all_dirty_counts() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let mut dirty = BTreeMap::new();
    dirty.insert("ARMING_CHECK".to_string(), 0.0);
    dirty.insert("MISSING_PARAM".to_string(), 1.0);
    dirty.insert("RATE_RLL_P".to_string(), 0.15);

    let bulk = {
        let session = session.clone();
        tokio::spawn(async move { session.write_all_dirty(&dirty).await })
    };

    // Writes are sequential in name order; RATE_RLL_P is never echoed
    vehicle.expect_param_set("ARMING_CHECK").await;
    vehicle.send_param("ARMING_CHECK", 0.0, 0, 4).await;

    let summary = bulk.await.unwrap().unwrap();
    assert_eq!(summary.success, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
}

// ==================== Commands ====================

#[tokio::test(start_paused = true)]
async fn test_out_of_order_acks() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let motor = {
        let session = session.clone();
        tokio::spawn(async move { session.test_motor(1, 10.0, 2.0).await })
    };
    vehicle.expect_command(mav_cmd::DO_MOTOR_TEST).await;

    let reboot = {
        let session = session.clone();
        tokio::spawn(async move { session.reboot().await })
    };
    vehicle.expect_command(mav_cmd::PREFLIGHT_REBOOT_SHUTDOWN).await;

    vehicle.ack(mav_cmd::PREFLIGHT_REBOOT_SHUTDOWN, 4).await;
    vehicle.ack(mav_cmd::DO_MOTOR_TEST, 0).await;

    assert_eq!(reboot.await.unwrap().unwrap(), CommandReply::Ack(MavResult::Failed));
    assert_eq!(motor.await.unwrap().unwrap(), CommandReply::Ack(MavResult::Accepted));
}

#[tokio::test(start_paused = true)]
async fn test_command_times_out() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.arm(true).await })
    };
    let cmd = vehicle.expect_command(mav_cmd::COMPONENT_ARM_DISARM).await;
    assert_eq!(cmd.params[0], 1.0);

    assert_eq!(waiter.await.unwrap().unwrap(), CommandReply::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn test_resent_command_supersedes_earlier() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.test_motor(1, 10.0, 1.0).await })
    };
    vehicle.expect_command(mav_cmd::DO_MOTOR_TEST).await;

    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.test_motor(2, 10.0, 1.0).await })
    };
    vehicle.expect_command(mav_cmd::DO_MOTOR_TEST).await;
    vehicle.ack(mav_cmd::DO_MOTOR_TEST, 0).await;

    assert_eq!(first.await.unwrap().unwrap(), CommandReply::Cancelled);
    assert_eq!(second.await.unwrap().unwrap(), CommandReply::Ack(MavResult::Accepted));
}

// ==================== Calibration ====================

#[tokio::test(start_paused = true)]
async fn test_accel_calibration_flow() {
    let (session, mut vehicle) = connected(&sample_params()).await;
    let mut events = session.subscribe();

    let calibration = {
        let session = session.clone();
        tokio::spawn(async move { session.start_accel_calibration().await })
    };

    let start = vehicle.expect_command(mav_cmd::PREFLIGHT_CALIBRATION).await;
    assert_eq!(start.params[4], 1.0);

    vehicle
        .send(&StatusText {
            severity: 6,
            text: "Place vehicle level and press any key.".into(),
        })
        .await;

    session.confirm_accel_position().await.unwrap();
    let confirm = vehicle
        .expect(|m| match m {
            Message::CommandAck(ack) => Some(ack),
            _ => None,
        })
        .await;
    assert_eq!(confirm.command, 0);
    assert_eq!(confirm.result, 1);

    // Final verdict arrives as the ack of the start command
    vehicle.ack(mav_cmd::PREFLIGHT_CALIBRATION, 0).await;
    assert_eq!(
        calibration.await.unwrap().unwrap(),
        CommandReply::Ack(MavResult::Accepted)
    );

    let mut saw_text = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StatusText { text, .. } = event {
            saw_text |= text.starts_with("Place vehicle level");
        }
    }
    assert!(saw_text);
    assert!(session.snapshot().calibration.active.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_accel_calibration() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    let calibration = {
        let session = session.clone();
        tokio::spawn(async move { session.start_accel_calibration().await })
    };
    vehicle.expect_command(mav_cmd::PREFLIGHT_CALIBRATION).await;

    session.cancel_calibration().await.unwrap();
    assert_eq!(calibration.await.unwrap().unwrap(), CommandReply::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_compass_progress_forwarded() {
    let (session, mut vehicle) = connected(&sample_params()).await;
    let mut events = session.subscribe();

    let start = {
        let session = session.clone();
        tokio::spawn(async move { session.start_compass_calibration().await })
    };
    vehicle.expect_command(mav_cmd::DO_START_MAG_CAL).await;
    vehicle.ack(mav_cmd::DO_START_MAG_CAL, 0).await;
    assert!(start.await.unwrap().unwrap().is_accepted());

    vehicle
        .send(&MagCalProgress {
            direction: [0.0; 3],
            compass_id: 0,
            cal_mask: 1,
            cal_status: 2,
            attempt: 1,
            completion_pct: 42,
            completion_mask: [0; 10],
        })
        .await;

    let progress = loop {
        match events.recv().await.unwrap() {
            SessionEvent::CompassProgress { progress } => break progress,
            _ => continue,
        }
    };
    assert_eq!(progress.completion_pct, 42);

    session.cancel_calibration().await.unwrap();
    vehicle.expect_command(mav_cmd::DO_CANCEL_MAG_CAL).await;
}

// ==================== Streams ====================

#[tokio::test(start_paused = true)]
async fn test_stream_activation_sequence() {
    let mut params = sample_params();
    params.push(("SR0_EXTRA1", 0.0));
    params.push(("SR1_POSITION", 0.0));
    let (_session, mut vehicle) = connected(&params).await;

    let first = vehicle
        .expect(|m| match m {
            Message::ParamSet(set) if set.param_id.starts_with("SR") => Some(set),
            _ => None,
        })
        .await;
    assert_eq!(first.param_id, "SR0_EXTRA1");
    assert_eq!(first.param_value, 4.0);
    vehicle.expect_param_set("SR1_POSITION").await;

    for _ in 0..3 {
        let request = vehicle
            .expect(|m| match m {
                Message::RequestDataStream(req) => Some(req),
                _ => None,
            })
            .await;
        assert_eq!(request.req_stream_id, 0);
        assert_eq!(request.req_message_rate, 4);
        assert_eq!(request.start_stop, 1);
    }

    let interval = vehicle.expect_command(mav_cmd::SET_MESSAGE_INTERVAL).await;
    assert_eq!(interval.params[1], 250_000.0);
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_stops_stream_retries() {
    let (session, mut vehicle) = connected(&sample_params()).await;

    vehicle.expect_command(mav_cmd::SET_MESSAGE_INTERVAL).await;
    vehicle
        .send(&SysStatus {
            sensors_present: 1,
            sensors_enabled: 1,
            sensors_health: 1,
            load: 0,
            voltage_battery: 16_800,
            current_battery: 500,
            drop_rate_comm: 0,
            errors_comm: 0,
            errors_count: [0; 4],
            battery_remaining: 90,
        })
        .await;

    let retry = timeout(
        Duration::from_secs(8),
        vehicle.expect(|m| matches!(m, Message::RequestDataStream(_)).then_some(())),
    )
    .await;
    assert!(retry.is_err(), "streams re-requested despite telemetry");

    let battery = session.snapshot().battery.unwrap();
    assert_eq!(battery.voltage_v, Some(16.8));
    assert_eq!(battery.remaining_pct, Some(90));
}

#[tokio::test(start_paused = true)]
async fn test_stream_activation_retried_without_telemetry() {
    let (_session, mut vehicle) = connected(&sample_params()).await;

    let mut requests = 0;
    while requests < 6 {
        vehicle
            .expect(|m| matches!(m, Message::RequestDataStream(_)).then_some(()))
            .await;
        requests += 1;
    }
}
