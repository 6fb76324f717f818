//! RTK fusion of the base's and one rover's observable streams.
//!
//! Each rover session owns a [Fuser]; every batch it reads is projected
//! together with a snapshot of the base's latest batch into the engine's
//! observation layout, navigation data is assembled from the rover's
//! assistance maps, and the engine is asked for a solution.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::Arc;

use log::{debug, info};

use crate::errors::Error;
use crate::gps::{GpsAlmanac, GpsData, GpsEphemeris, GpsRefTime};
use crate::observables::SdrObservable;
use crate::registry::Registry;
use crate::rtk::{
    AlmanacEntry, EphemerisEntry, GpsTime, IonoParameters, NavigationData, Observation, RtkConfig,
    RtkEngine, RtkState, UtcParameters, RECEIVER_BASE, RECEIVER_ROVER,
};

const HALF_WEEK: f64 = 302_400.0;
const WEEK: f64 = 604_800.0;

pub struct Fuser {
    registry: Arc<Registry>,
    gps_data: GpsData,
    engine: Arc<dyn RtkEngine>,
    state: RtkState,
}

impl Fuser {
    /// Builds the fuser for one rover. Engine state is initialized here,
    /// once, and reused for every batch: fixed base, single frequency.
    pub fn new(registry: Arc<Registry>, gps_data: GpsData, engine: Arc<dyn RtkEngine>) -> Self {
        Self {
            registry,
            gps_data,
            engine,
            state: RtkState::new(RtkConfig::default()),
        }
    }

    /// Fuses one rover batch with the base snapshot and runs the engine.
    pub fn position(&mut self, observables: &[SdrObservable]) -> Result<(), Error> {
        if !self.registry.has_base() {
            return Err(Error::NoBaseStation);
        }

        let base_ref_time = self
            .registry
            .base_ref_time()?
            .read(0)?
            .unwrap_or_default();
        let base_observables = self.registry.base_observables();

        let rover_ref_time = self.gps_data.ref_time()?.read(0)?.unwrap_or_default();

        let mut merged = BTreeMap::new();
        project_observations(&mut merged, &base_observables, RECEIVER_BASE, &base_ref_time);
        project_observations(&mut merged, observables, RECEIVER_ROVER, &rover_ref_time);
        let observations: Vec<Observation> = merged.into_values().collect();

        let nav = self.navigation_data(&rover_ref_time)?;

        debug!(
            "{}: solving with {} observations, {} ephemerides",
            self.gps_data.name(),
            observations.len(),
            nav.ephemeris.len(),
        );

        match self.engine.solve(&mut self.state, &observations, &nav) {
            Some(solution) => {
                info!("{} rover {}", self.gps_data.name(), solution.rover);
                info!("{} base {}", self.gps_data.name(), solution.base);
                Ok(())
            },
            None => Err(Error::RtkFailure),
        }
    }

    fn navigation_data(&self, ref_time: &GpsRefTime) -> Result<NavigationData, Error> {
        let mut nav = NavigationData::default();

        for eph in self.gps_data.ephemeris()?.snapshot()?.values() {
            nav.ephemeris.push(project_ephemeris(eph));
        }

        for alm in self.gps_data.almanac()?.snapshot()?.values() {
            nav.almanac.push(project_almanac(alm, ref_time.week));
        }

        if let Some(utc) = self.gps_data.utc_model()?.read(0)? {
            if utc.valid {
                nav.utc = Some(UtcParameters {
                    a0: utc.a0,
                    a1: utc.a1,
                    tot: utc.tot,
                    week: utc.wn_t,
                    leap_seconds: utc.delta_t_ls,
                });
            }
        }

        if let Some(iono) = self.gps_data.iono()?.read(0)? {
            if iono.valid {
                nav.iono = Some(IonoParameters {
                    alpha: [iono.alpha0, iono.alpha1, iono.alpha2, iono.alpha3],
                    beta: [iono.beta0, iono.beta1, iono.beta2, iono.beta3],
                });
            }
        }

        Ok(nav)
    }
}

/// Projects a batch into engine observations, keyed `(receiver, satellite)`
/// so duplicates within a receiver collapse last-write-wins and iteration
/// yields the required receiver-then-satellite order.
fn project_observations(
    out: &mut BTreeMap<(u8, u8), Observation>,
    observables: &[SdrObservable],
    receiver: u8,
    ref_time: &GpsRefTime,
) {
    for data in observables {
        let sat = data.prn as u8;
        out.insert(
            (receiver, sat),
            Observation {
                time: GpsTime::from_tow(ref_time.week, data.tow),
                sat,
                receiver,
                code: Default::default(),
                carrier_phase_cycles: data.carrier_phase_rads / TAU,
                pseudorange_m: data.pseudorange_m,
                doppler_hz: data.carrier_doppler_hz,
            },
        );
    }
}

/// Broadcast ephemeris to engine form, including the satellite clock-bias
/// correction of the transmission time.
fn project_ephemeris(dat: &GpsEphemeris) -> EphemerisEntry {
    let mut dt = dat.tow - dat.toc;
    if dt > HALF_WEEK {
        dt -= WEEK;
    }
    if dt < -HALF_WEEK {
        dt += WEEK;
    }
    let corr = ((dat.af2 * dt + dat.af1) * dt + dat.af0) + dat.dtr;

    EphemerisEntry {
        sat: dat.prn as u8,
        iodc: dat.iodc as i32,
        iode: dat.iode_sf2 as i32,
        sv_accuracy: dat.sv_accuracy,
        sv_health: dat.sv_health,
        week: dat.week,
        code_on_l2: dat.code_on_l2,
        l2_p_data: dat.l2_p_data_flag,
        toe: GpsTime::from_tow(dat.week, dat.toe),
        toc: GpsTime::from_tow(dat.week, dat.toc),
        ttr: GpsTime::from_tow(dat.week, dat.tow - corr),
        a: dat.sqrt_a * dat.sqrt_a,
        e: dat.eccentricity,
        i0: dat.i0,
        omega0: dat.omega0,
        omega: dat.omega,
        m0: dat.m0,
        delta_n: dat.delta_n,
        omega_dot: dat.omega_dot,
        idot: dat.idot,
        crc: dat.crc,
        cic: dat.cic,
        cis: dat.cis,
        cus: dat.cus,
        crs: dat.crs,
        cuc: dat.cuc,
        toes: dat.tow,
        fit_interval: dat.fit_interval_flag,
        af0: dat.af0,
        af1: dat.af1,
        af2: dat.af2,
        tgd: [dat.tgd, 0.0, 0.0, 0.0],
    }
}

fn project_almanac(dat: &GpsAlmanac, week: i32) -> AlmanacEntry {
    AlmanacEntry {
        sat: dat.prn as u8,
        sv_health: dat.sv_health,
        sv_config: 0,
        week,
        toa: GpsTime::from_tow(week, dat.toa),
        a: dat.sqrt_a * dat.sqrt_a,
        e: dat.eccentricity,
        i0: 0.0, // almanac inclination pending a proper source
        omega0: dat.omega0,
        omega: dat.omega,
        m0: dat.m0,
        omega_dot: dat.omega_dot,
        toas: dat.toa,
        af0: dat.af0,
        af1: dat.af1,
    }
}

#[cfg(test)]
mod test {
    use super::{project_almanac, project_ephemeris, project_observations, Fuser};
    use std::collections::BTreeMap;
    use std::f64::consts::TAU;
    use std::sync::{Arc, Mutex};

    use crate::errors::Error;
    use crate::gps::{GpsAlmanac, GpsData, GpsEphemeris, GpsRefTime};
    use crate::observables::SdrObservable;
    use crate::registry::Registry;
    use crate::rtk::{
        GpsTime, NavigationData, Observation, RtkEngine, RtkSolution, RtkState, SolutionVector,
        RECEIVER_BASE, RECEIVER_ROVER,
    };
    use crate::station::{Station, StationType};

    fn observable(prn: u32, tow: f64) -> SdrObservable {
        SdrObservable {
            prn,
            tow,
            carrier_phase_rads: TAU * 100.0,
            pseudorange_m: 20_000_000.0 + prn as f64,
            carrier_doppler_hz: -100.0 - prn as f64,
            ..Default::default()
        }
    }

    #[test]
    fn dedup_and_ordering() {
        let ref_time = GpsRefTime {
            week: 2200,
            ..Default::default()
        };

        let mut merged = BTreeMap::new();
        project_observations(
            &mut merged,
            &[observable(9, 1.0), observable(3, 1.0)],
            RECEIVER_BASE,
            &ref_time,
        );
        project_observations(
            &mut merged,
            &[
                observable(7, 1.0),
                observable(2, 1.0),
                // duplicate PRN: the later record wins
                SdrObservable {
                    pseudorange_m: 1.0,
                    ..observable(7, 1.0)
                },
            ],
            RECEIVER_ROVER,
            &ref_time,
        );

        let observations: Vec<Observation> = merged.into_values().collect();
        let keys: Vec<(u8, u8)> = observations.iter().map(|o| (o.receiver, o.sat)).collect();

        // rover (receiver 1) first, satellites ascending within each receiver
        assert_eq!(keys, vec![(1, 2), (1, 7), (2, 3), (2, 9)]);

        let dup = observations.iter().find(|o| o.sat == 7).unwrap();
        assert_eq!(dup.pseudorange_m, 1.0);
    }

    #[test]
    fn observation_projection_fields() {
        let ref_time = GpsRefTime {
            week: 2200,
            ..Default::default()
        };

        let mut merged = BTreeMap::new();
        project_observations(&mut merged, &[observable(5, 345_600.0)], RECEIVER_ROVER, &ref_time);
        let obs = merged.values().next().unwrap();

        assert_eq!(obs.sat, 5);
        assert_eq!(obs.receiver, RECEIVER_ROVER);
        assert!((obs.carrier_phase_cycles - 100.0).abs() < 1e-9);
        assert_eq!(obs.time, GpsTime::from_tow(2200, 345_600.0));
    }

    #[test]
    fn ephemeris_clock_bias_correction() {
        let eph = GpsEphemeris {
            prn: 11,
            week: 100,
            tow: 1000.0,
            toc: 400.0,
            af0: 1e-4,
            af1: 1e-9,
            af2: 0.0,
            dtr: 2e-8,
            sqrt_a: 2.0,
            ..Default::default()
        };

        let entry = project_ephemeris(&eph);
        let dt = 600.0;
        let corr = 1e-9 * dt + 1e-4 + 2e-8;
        assert_eq!(entry.ttr, GpsTime::from_tow(100, 1000.0 - corr));
        assert_eq!(entry.a, 4.0);
        assert_eq!(entry.toes, 1000.0);
        assert_eq!(entry.tgd[0], 0.0);
    }

    #[test]
    fn ephemeris_correction_wraps_week_boundary() {
        // decoded just after week rollover against a Toc from the end of
        // the previous week: dt must wrap to a small negative value
        let eph = GpsEphemeris {
            week: 100,
            tow: 10.0,
            toc: 604_790.0,
            af0: 1.0,
            ..Default::default()
        };

        let entry = project_ephemeris(&eph);
        // dt = 10 - 604790 + 604800 = 20, corr = af0
        assert_eq!(entry.ttr, GpsTime::from_tow(100, 10.0 - 1.0));
    }

    #[test]
    fn almanac_keeps_placeholder_inclination() {
        let alm = GpsAlmanac {
            prn: 4,
            toa: 61_440.0,
            sqrt_a: 3.0,
            ..Default::default()
        };

        let entry = project_almanac(&alm, 2200);
        assert_eq!(entry.i0, 0.0);
        assert_eq!(entry.a, 9.0);
        assert_eq!(entry.week, 2200);
        assert_eq!(entry.toas, 61_440.0);
        assert_eq!(entry.sv_config, 0);
    }

    /// Engine that records what it is handed and always answers.
    #[derive(Default)]
    struct ScriptedEngine {
        seen: Mutex<Vec<Vec<Observation>>>,
    }

    impl RtkEngine for ScriptedEngine {
        fn solve(
            &self,
            _state: &mut RtkState,
            observations: &[Observation],
            _nav: &NavigationData,
        ) -> Option<RtkSolution> {
            self.seen.lock().unwrap().push(observations.to_vec());
            Some(RtkSolution {
                rover: SolutionVector {
                    position: [1.0, 2.0, 3.0],
                    velocity: [0.0; 3],
                },
                base: SolutionVector::default(),
            })
        }
    }

    #[test]
    fn fuses_base_and_rover_batches() {
        let registry = Arc::new(Registry::new());
        registry
            .add(&Station::new(StationType::Base, "127.0.1.1", 1234))
            .unwrap();
        registry.set_base_observables(vec![observable(8, 2.0)]);

        let rover = Station::new(StationType::Rover, "127.0.1.2", 1234);
        registry.add(&rover).unwrap();

        let engine = Arc::new(ScriptedEngine::default());
        let mut fuser = Fuser::new(
            registry.clone(),
            GpsData::for_station(&rover),
            engine.clone(),
        );

        fuser.position(&[observable(5, 2.0)]).unwrap();

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let keys: Vec<(u8, u8)> = seen[0].iter().map(|o| (o.receiver, o.sat)).collect();
        assert_eq!(keys, vec![(1, 5), (2, 8)]);
    }

    #[test]
    fn no_base_is_an_error() {
        let registry = Arc::new(Registry::new());
        let rover = Station::new(StationType::Rover, "127.0.1.3", 1234);

        let mut fuser = Fuser::new(
            registry,
            GpsData::for_station(&rover),
            Arc::new(ScriptedEngine::default()),
        );

        assert!(matches!(
            fuser.position(&[observable(1, 0.0)]),
            Err(Error::NoBaseStation)
        ));
    }
}
