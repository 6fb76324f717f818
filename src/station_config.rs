//! Persisted per-station calibration record.
//!
//! Lives as `station_config` inside the station's working directory; when a
//! front-end has been calibrated once, the saved IF bias short-circuits the
//! whole FE-CAL run on the next admission.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

pub const STATION_CONFIG_FILE: &str = "station_config";

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    /// IF bias recorded by front-end-cal, Hz.
    pub if_bias: f64,
}

impl StationConfig {
    pub fn new(if_bias: f64) -> Self {
        Self { if_bias }
    }

    /// Returns `None` on any I/O or decode error.
    pub fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        toml::from_str(&text).ok()
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let text = toml::to_string(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::StationConfig;

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station_config");

        let config = StationConfig::new(12_345.0);
        config.save(&path).unwrap();
        assert_eq!(StationConfig::load(&path), Some(config));

        let negative = StationConfig::new(-987.625);
        negative.save(&path).unwrap();
        assert_eq!(StationConfig::load(&path), Some(negative));
    }

    #[test]
    fn encoding_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station_config");

        let config = StationConfig::new(42.5);
        config.save(&path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        config.save(&path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_failures_are_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(StationConfig::load(&dir.path().join("missing")), None);

        let garbled = dir.path().join("garbled");
        std::fs::write(&garbled, "if_bias = \"not a number\"").unwrap();
        assert_eq!(StationConfig::load(&garbled), None);
    }
}
