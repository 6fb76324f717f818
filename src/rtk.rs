//! Types at the boundary with the RTK positioning engine.
//!
//! The solver numerics live outside this crate; the fuser prepares
//! observations and navigation data in the shapes below and hands them to
//! whichever [RtkEngine] implementation was wired in at startup. Time is
//! carried as Unix seconds split into an integer and a fractional part so
//! sub-millisecond epochs survive the trip.

use std::fmt;

/// Unix time of the GPS epoch, 1980-01-06T00:00:00Z.
pub const GPS_EPOCH_UNIX: i64 = 315_964_800;

pub const SECONDS_PER_WEEK: f64 = 604_800.0;

/// Receiver ids in the observation set.
pub const RECEIVER_ROVER: u8 = 1;
pub const RECEIVER_BASE: u8 = 2;

/// An instant as Unix seconds plus a fraction in `[0, 1)`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GpsTime {
    pub sec: i64,
    pub frac: f64,
}

impl GpsTime {
    /// Converts `(week, seconds-of-week)` to absolute time. The week is
    /// taken modulo 1024, matching the ten-bit counter the navigation
    /// message actually transmits.
    pub fn from_tow(week: i32, tow: f64) -> Self {
        let total = f64::from(week.rem_euclid(1024)) * SECONDS_PER_WEEK + tow;
        let whole = total.floor();
        Self {
            sec: GPS_EPOCH_UNIX + whole as i64,
            frac: total - whole,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.frac
    }
}

impl fmt::Display for GpsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_secs_f64())
    }
}

/// Signal codes the fuser emits. Single-frequency GPS for now.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SignalCode {
    #[default]
    GpsL1Ca,
}

/// One projected observation, one satellite at one receiver.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Observation {
    pub time: GpsTime,
    pub sat: u8,
    pub receiver: u8,
    pub code: SignalCode,
    pub carrier_phase_cycles: f64,
    pub pseudorange_m: f64,
    pub doppler_hz: f64,
}

/// Broadcast ephemeris in engine form: absolute times, semi-major axis
/// instead of its square root.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EphemerisEntry {
    pub sat: u8,
    pub iodc: i32,
    pub iode: i32,
    pub sv_accuracy: i32,
    pub sv_health: i32,
    pub week: i32,
    pub code_on_l2: i32,
    pub l2_p_data: bool,
    pub toe: GpsTime,
    pub toc: GpsTime,
    /// Transmission time, clock-bias corrected.
    pub ttr: GpsTime,
    pub a: f64,
    pub e: f64,
    pub i0: f64,
    pub omega0: f64,
    pub omega: f64,
    pub m0: f64,
    pub delta_n: f64,
    pub omega_dot: f64,
    pub idot: f64,
    pub crc: f64,
    pub cic: f64,
    pub cis: f64,
    pub cus: f64,
    pub crs: f64,
    pub cuc: f64,
    /// Toe in seconds of week.
    pub toes: f64,
    pub fit_interval: bool,
    pub af0: f64,
    pub af1: f64,
    pub af2: f64,
    pub tgd: [f64; 4],
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AlmanacEntry {
    pub sat: u8,
    pub sv_health: i32,
    pub sv_config: i32,
    pub week: i32,
    pub toa: GpsTime,
    pub a: f64,
    pub e: f64,
    pub i0: f64,
    pub omega0: f64,
    pub omega: f64,
    pub m0: f64,
    pub omega_dot: f64,
    /// Toa in seconds of week.
    pub toas: f64,
    pub af0: f64,
    pub af1: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct UtcParameters {
    pub a0: f64,
    pub a1: f64,
    pub tot: f64,
    pub week: i32,
    pub leap_seconds: i32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct IonoParameters {
    pub alpha: [f64; 4],
    pub beta: [f64; 4],
}

/// Everything the engine needs besides the observations.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NavigationData {
    pub ephemeris: Vec<EphemerisEntry>,
    pub almanac: Vec<AlmanacEntry>,
    pub utc: Option<UtcParameters>,
    pub iono: Option<IonoParameters>,
}

/// Engine positioning mode. The supervisor always runs a fixed base.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PositioningMode {
    #[default]
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtkConfig {
    pub mode: PositioningMode,
    /// Number of carrier frequencies.
    pub frequencies: u8,
}

impl Default for RtkConfig {
    fn default() -> Self {
        Self {
            mode: PositioningMode::Fixed,
            frequencies: 1,
        }
    }
}

/// Engine state, initialized once per fuser and carried across batches.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RtkState {
    pub config: RtkConfig,
}

impl RtkState {
    pub fn new(config: RtkConfig) -> Self {
        Self { config }
    }
}

/// ECEF position and velocity, metres and metres per second.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SolutionVector {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
}

impl fmt::Display for SolutionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x={:.4} y={:.4} z={:.4} vx={:.4} vy={:.4} vz={:.4}",
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RtkSolution {
    pub rover: SolutionVector,
    pub base: SolutionVector,
}

/// The boundary with the positioning backend. `None` means the engine could
/// not produce a solution for this batch; the session carries on.
pub trait RtkEngine: Send + Sync {
    fn solve(
        &self,
        state: &mut RtkState,
        observations: &[Observation],
        nav: &NavigationData,
    ) -> Option<RtkSolution>;
}

/// Stand-in engine used until a positioning backend is wired in: every
/// problem is reported unsolvable. Keeps the rest of the supervisor fully
/// operational (admission, calibration, streaming, projection).
#[derive(Debug, Default)]
pub struct DisabledEngine;

impl RtkEngine for DisabledEngine {
    fn solve(
        &self,
        _state: &mut RtkState,
        _observations: &[Observation],
        _nav: &NavigationData,
    ) -> Option<RtkSolution> {
        None
    }
}
