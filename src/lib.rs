//! # Flight Link Library
//!
//! Talk to a MAVLink flight controller over a serial link.
//!
//! This library provides the ground-station protocol engine: MAVLink v1/v2
//! framing, the connection handshake, loss-tolerant parameter download,
//! confirmed parameter writes, command/ack correlation and sensor calibration
//! flows. Presentation layers consume [`telemetry::VehicleSnapshot`]s and
//! [`session::SessionEvent`]s and drive the vehicle through a
//! [`session::SessionHandle`].

pub mod calibration;
pub mod command;
pub mod config;
pub mod error;
pub mod mavlink;
pub mod params;
pub mod serial;
pub mod session;
pub mod telemetry;
