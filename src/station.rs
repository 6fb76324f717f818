use std::fmt;
use std::path::{Path, PathBuf};

/// Role a remote antenna plays in the RTK fleet.
///
/// Wire values match the announcement packet: 1 = base, 2 = rover. Anything
/// else degrades to [StationType::Unknown], which is never admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationType {
    Unknown,
    Base,
    Rover,
}

impl StationType {
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Base,
            2 => Self::Rover,
            _ => Self::Unknown,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Base => 1,
            Self::Rover => 2,
        }
    }
}

impl fmt::Display for StationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Base => write!(f, "base"),
            Self::Rover => write!(f, "rover"),
        }
    }
}

/// One remote antenna front-end.
///
/// Identity is the textual address: two stations with the same address are
/// the same physical antenna, whatever their announced name or port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub kind: StationType,
    pub address: String,
    pub port: u16,
    pub name: Option<String>,
}

impl Station {
    pub fn new(kind: StationType, address: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            port,
            name: None,
            address: address.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// A station is admissible iff its type is known, its address is
    /// non-empty and its port is nonzero. The name stays optional.
    pub fn is_valid(&self) -> bool {
        self.kind != StationType::Unknown && !self.address.is_empty() && self.port != 0
    }

    /// Working directory for this station under `work_dir`: the address
    /// with `:` replaced by `.` so IPv6 literals stay path-safe.
    pub fn directory(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(self.address.replace(':', "."))
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}@{}:{} ({})", name, self.address, self.port, self.kind),
            None => write!(f, "{}:{} ({})", self.address, self.port, self.kind),
        }
    }
}
