//! GPS assistance records and the per-station shared-map handles.
//!
//! The worker binaries publish navigation-message assistance data into the
//! shared maps as they decode it; the fuser snapshots those maps per rover
//! batch. Records carry the fields the fuser consumes plus the identifying
//! fields of the originating subframes, in a fixed little-endian layout so
//! both sides of the process boundary agree byte for byte.

use std::sync::{Arc, Mutex};

use crate::errors::Error;
use crate::shm::{SharedMap, SharedRecord};
use crate::station::{Station, StationType};
use crate::wire::{Reader, Writer};

/// Name of the base reference-time map; a wire contract with the worker
/// binaries, shared with the registry's lazily created handle.
pub const BASE_REF_TIME_NAME: &str = "genesis.base.gps_ref_time";

/// GPS LNAV ephemeris for one satellite.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GpsEphemeris {
    pub prn: u32,
    pub week: i32,
    pub sv_accuracy: i32,
    pub sv_health: i32,
    pub code_on_l2: i32,
    pub iodc: f64,
    pub iode_sf2: f64,
    /// TOW of the decoding epoch, seconds of week.
    pub tow: f64,
    pub toe: f64,
    pub toc: f64,
    pub sqrt_a: f64,
    pub eccentricity: f64,
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
    pub af0: f64,
    pub af1: f64,
    pub af2: f64,
    /// Relativistic clock correction, seconds.
    pub dtr: f64,
    pub tgd: f64,
    pub l2_p_data_flag: bool,
    pub fit_interval_flag: bool,
}

impl SharedRecord for GpsEphemeris {
    const SIZE: usize = 222;

    fn encode_record(&self, buf: &mut [u8]) {
        let mut w = Writer::new(buf);
        w.u32(self.prn);
        w.i32(self.week);
        w.i32(self.sv_accuracy);
        w.i32(self.sv_health);
        w.i32(self.code_on_l2);
        w.f64(self.iodc);
        w.f64(self.iode_sf2);
        w.f64(self.tow);
        w.f64(self.toe);
        w.f64(self.toc);
        w.f64(self.sqrt_a);
        w.f64(self.eccentricity);
        w.f64(self.i0);
        w.f64(self.omega0);
        w.f64(self.omega);
        w.f64(self.m0);
        w.f64(self.delta_n);
        w.f64(self.omega_dot);
        w.f64(self.idot);
        w.f64(self.crc);
        w.f64(self.cic);
        w.f64(self.cis);
        w.f64(self.cus);
        w.f64(self.crs);
        w.f64(self.cuc);
        w.f64(self.af0);
        w.f64(self.af1);
        w.f64(self.af2);
        w.f64(self.dtr);
        w.f64(self.tgd);
        w.bool(self.l2_p_data_flag);
        w.bool(self.fit_interval_flag);
        debug_assert_eq!(w.position(), Self::SIZE);
    }

    fn decode_record(buf: &[u8]) -> Self {
        let mut r = Reader::new(buf);
        let out = Self {
            prn: r.u32(),
            week: r.i32(),
            sv_accuracy: r.i32(),
            sv_health: r.i32(),
            code_on_l2: r.i32(),
            iodc: r.f64(),
            iode_sf2: r.f64(),
            tow: r.f64(),
            toe: r.f64(),
            toc: r.f64(),
            sqrt_a: r.f64(),
            eccentricity: r.f64(),
            i0: r.f64(),
            omega0: r.f64(),
            omega: r.f64(),
            m0: r.f64(),
            delta_n: r.f64(),
            omega_dot: r.f64(),
            idot: r.f64(),
            crc: r.f64(),
            cic: r.f64(),
            cis: r.f64(),
            cus: r.f64(),
            crs: r.f64(),
            cuc: r.f64(),
            af0: r.f64(),
            af1: r.f64(),
            af2: r.f64(),
            dtr: r.f64(),
            tgd: r.f64(),
            l2_p_data_flag: r.bool(),
            fit_interval_flag: r.bool(),
        };
        debug_assert_eq!(r.position(), Self::SIZE);
        out
    }
}

/// Klobuchar ionosphere model coefficients.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GpsIono {
    pub alpha0: f64,
    pub alpha1: f64,
    pub alpha2: f64,
    pub alpha3: f64,
    pub beta0: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub beta3: f64,
    pub valid: bool,
}

impl SharedRecord for GpsIono {
    const SIZE: usize = 65;

    fn encode_record(&self, buf: &mut [u8]) {
        let mut w = Writer::new(buf);
        w.f64(self.alpha0);
        w.f64(self.alpha1);
        w.f64(self.alpha2);
        w.f64(self.alpha3);
        w.f64(self.beta0);
        w.f64(self.beta1);
        w.f64(self.beta2);
        w.f64(self.beta3);
        w.bool(self.valid);
        debug_assert_eq!(w.position(), Self::SIZE);
    }

    fn decode_record(buf: &[u8]) -> Self {
        let mut r = Reader::new(buf);
        Self {
            alpha0: r.f64(),
            alpha1: r.f64(),
            alpha2: r.f64(),
            alpha3: r.f64(),
            beta0: r.f64(),
            beta1: r.f64(),
            beta2: r.f64(),
            beta3: r.f64(),
            valid: r.bool(),
        }
    }
}

/// UTC model parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GpsUtcModel {
    pub a0: f64,
    pub a1: f64,
    /// Reference time of week, seconds.
    pub tot: f64,
    pub wn_t: i32,
    pub delta_t_ls: i32,
    pub valid: bool,
}

impl SharedRecord for GpsUtcModel {
    const SIZE: usize = 33;

    fn encode_record(&self, buf: &mut [u8]) {
        let mut w = Writer::new(buf);
        w.f64(self.a0);
        w.f64(self.a1);
        w.f64(self.tot);
        w.i32(self.wn_t);
        w.i32(self.delta_t_ls);
        w.bool(self.valid);
        debug_assert_eq!(w.position(), Self::SIZE);
    }

    fn decode_record(buf: &[u8]) -> Self {
        let mut r = Reader::new(buf);
        Self {
            a0: r.f64(),
            a1: r.f64(),
            tot: r.f64(),
            wn_t: r.i32(),
            delta_t_ls: r.i32(),
            valid: r.bool(),
        }
    }
}

/// Mid-accuracy almanac orbit for one satellite.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GpsAlmanac {
    pub prn: u32,
    pub sv_health: i32,
    pub toa: f64,
    pub sqrt_a: f64,
    pub eccentricity: f64,
    pub omega0: f64,
    pub omega: f64,
    pub m0: f64,
    pub omega_dot: f64,
    pub af0: f64,
    pub af1: f64,
}

impl SharedRecord for GpsAlmanac {
    const SIZE: usize = 80;

    fn encode_record(&self, buf: &mut [u8]) {
        let mut w = Writer::new(buf);
        w.u32(self.prn);
        w.i32(self.sv_health);
        w.f64(self.toa);
        w.f64(self.sqrt_a);
        w.f64(self.eccentricity);
        w.f64(self.omega0);
        w.f64(self.omega);
        w.f64(self.m0);
        w.f64(self.omega_dot);
        w.f64(self.af0);
        w.f64(self.af1);
        debug_assert_eq!(w.position(), Self::SIZE);
    }

    fn decode_record(buf: &[u8]) -> Self {
        let mut r = Reader::new(buf);
        Self {
            prn: r.u32(),
            sv_health: r.i32(),
            toa: r.f64(),
            sqrt_a: r.f64(),
            eccentricity: r.f64(),
            omega0: r.f64(),
            omega: r.f64(),
            m0: r.f64(),
            omega_dot: r.f64(),
            af0: r.f64(),
            af1: r.f64(),
        }
    }
}

/// Receiver reference time: GPS week/TOW plus the matching wall clock.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GpsRefTime {
    pub week: i32,
    pub tow: f64,
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl SharedRecord for GpsRefTime {
    const SIZE: usize = 28;

    fn encode_record(&self, buf: &mut [u8]) {
        let mut w = Writer::new(buf);
        w.i32(self.week);
        w.f64(self.tow);
        w.i64(self.tv_sec);
        w.i64(self.tv_usec);
        debug_assert_eq!(w.position(), Self::SIZE);
    }

    fn decode_record(buf: &[u8]) -> Self {
        let mut r = Reader::new(buf);
        Self {
            week: r.i32(),
            tow: r.f64(),
            tv_sec: r.i64(),
            tv_usec: r.i64(),
        }
    }
}

type Slot<R> = Mutex<Option<Arc<SharedMap<R>>>>;

/// One station's assistance-data handles, created lazily on first use. The
/// map names are the station's well-known identity on the bus: the base
/// publishes under `genesis.base.<kind>`, a rover under
/// `genesis.<address>.<kind>`.
pub struct GpsData {
    address: String,
    prefix: String,
    ref_time: Slot<GpsRefTime>,
    utc_model: Slot<GpsUtcModel>,
    almanac: Slot<GpsAlmanac>,
    iono: Slot<GpsIono>,
    ephemeris: Slot<GpsEphemeris>,
}

impl GpsData {
    pub fn for_station(st: &Station) -> Self {
        let prefix = match st.kind {
            StationType::Base => "genesis.base".to_string(),
            _ => format!("genesis.{}", st.address),
        };
        Self {
            prefix,
            address: st.address.clone(),
            ref_time: Mutex::new(None),
            utc_model: Mutex::new(None),
            almanac: Mutex::new(None),
            iono: Mutex::new(None),
            ephemeris: Mutex::new(None),
        }
    }

    /// The owning station's address, for logging.
    pub fn name(&self) -> &str {
        &self.address
    }

    fn handle<R: SharedRecord>(
        slot: &Slot<R>,
        prefix: &str,
        kind: &str,
    ) -> Result<Arc<SharedMap<R>>, Error> {
        let mut slot = slot.lock().unwrap();
        if let Some(map) = &*slot {
            return Ok(map.clone());
        }
        let map = Arc::new(SharedMap::create(format!("{}.{}", prefix, kind))?);
        *slot = Some(map.clone());
        Ok(map)
    }

    pub fn ref_time(&self) -> Result<Arc<SharedMap<GpsRefTime>>, Error> {
        Self::handle(&self.ref_time, &self.prefix, "gps_ref_time")
    }

    pub fn utc_model(&self) -> Result<Arc<SharedMap<GpsUtcModel>>, Error> {
        Self::handle(&self.utc_model, &self.prefix, "gps_utc_model")
    }

    pub fn almanac(&self) -> Result<Arc<SharedMap<GpsAlmanac>>, Error> {
        Self::handle(&self.almanac, &self.prefix, "gps_almanac")
    }

    pub fn iono(&self) -> Result<Arc<SharedMap<GpsIono>>, Error> {
        Self::handle(&self.iono, &self.prefix, "gps_iono")
    }

    pub fn ephemeris(&self) -> Result<Arc<SharedMap<GpsEphemeris>>, Error> {
        Self::handle(&self.ephemeris, &self.prefix, "gps_ephemeris")
    }
}
