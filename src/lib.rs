//! Genesis is a realtime multi-station GNSS receiver: a supervisor that
//! turns a fleet of remote antenna front-ends into one differential (RTK)
//! positioning service.
//!
//! Stations announce themselves over UDP; each admitted station gets its
//! front-end calibrated and a GNSS-SDR worker launched, the worker streams
//! observables back over a domain socket, and every rover batch is fused
//! with the base station's to drive the RTK engine. Navigation assistance
//! data travels between the processes on named shared-memory maps.

pub mod calibrator;
pub mod cli;
pub mod errors;
pub mod gps;
pub mod listener;
pub mod observables;
pub mod packet;
pub mod position;
pub mod registry;
pub mod rtk;
pub mod sdr;
pub mod session;
pub mod shm;
pub mod station;
pub mod station_config;
pub mod supervisor;
pub mod wire;
