//! The station registry: single source of truth for admitted stations.
//!
//! At most one base, any number of rovers, base and rovers disjoint by
//! address. One mutex guards the whole state, including the cached base
//! observables and the lazily created base reference-time handle, so every
//! reader sees a consistent snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::Error;
use crate::gps::{GpsRefTime, BASE_REF_TIME_NAME};
use crate::observables::SdrObservable;
use crate::shm::SharedMap;
use crate::station::{Station, StationType};

#[derive(Default)]
struct Inner {
    base: Option<Station>,
    rovers: HashMap<String, Station>,
    base_observables: Vec<SdrObservable>,
    base_ref_time: Option<Arc<SharedMap<GpsRefTime>>>,
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a station. Identity is the address: a station can be the base
    /// or a rover, never both, and rovers are unique.
    pub fn add(&self, st: &Station) -> Result<(), Error> {
        if !st.is_valid() {
            return Err(Error::InvalidStation);
        }

        let mut inner = self.inner.lock().unwrap();
        match st.kind {
            StationType::Rover => {
                if let Some(base) = &inner.base {
                    if base.address == st.address {
                        return Err(Error::StationIsBase);
                    }
                }
                if inner.rovers.contains_key(&st.address) {
                    return Err(Error::StationExists);
                }
                inner.rovers.insert(st.address.clone(), st.clone());
            },
            StationType::Base => {
                if let Some(base) = &inner.base {
                    if base.address == st.address {
                        return Err(Error::StationIsBase);
                    }
                    return Err(Error::BaseAlreadySet);
                }
                if inner.rovers.contains_key(&st.address) {
                    return Err(Error::StationIsRover);
                }
                inner.base = Some(st.clone());
                // A new base means the previous base's stream is meaningless.
                inner.base_observables = Vec::new();
                inner.base_ref_time = None;
            },
            StationType::Unknown => unreachable!("rejected by validation"),
        }
        Ok(())
    }

    /// Removes a station by identity. Removing twice yields
    /// [Error::StationNotFound] the second time.
    pub fn remove(&self, st: &Station) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();

        if inner
            .base
            .as_ref()
            .is_some_and(|base| base.address == st.address)
        {
            inner.base = None;
            inner.base_observables = Vec::new();
            inner.base_ref_time = None;
            return Ok(());
        }

        match inner.rovers.remove(&st.address) {
            Some(_) => Ok(()),
            None => Err(Error::StationNotFound),
        }
    }

    pub fn has_base(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.base.as_ref().is_some_and(|base| base.is_valid())
    }

    pub fn rover_count(&self) -> usize {
        self.inner.lock().unwrap().rovers.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.base.is_none() && inner.rovers.is_empty()
    }

    /// Handle to the base reference-time map, created on first use.
    pub fn base_ref_time(&self) -> Result<Arc<SharedMap<GpsRefTime>>, Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(map) = &inner.base_ref_time {
            return Ok(map.clone());
        }
        let map = Arc::new(SharedMap::create(BASE_REF_TIME_NAME)?);
        inner.base_ref_time = Some(map.clone());
        Ok(map)
    }

    /// Value copy of the base's latest batch; readers never share storage
    /// with the base session writer.
    pub fn base_observables(&self) -> Vec<SdrObservable> {
        self.inner.lock().unwrap().base_observables.clone()
    }

    pub fn set_base_observables(&self, observables: Vec<SdrObservable>) {
        self.inner.lock().unwrap().base_observables = observables;
    }
}
