use std::path::PathBuf;
use std::time::Duration;

use crate::model::RoomId;

pub const WAL_FILE_NAME: &str = "hotel.wal";
const DEFAULT_ROOMS: &str = "1=General's Quarters;2=Major's Suite";

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String, reason: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => write!(f, "{var}={value:?}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Process configuration, read once at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub store_timeout: Duration,
    /// Rooms created at start if missing.
    pub rooms: Vec<(RoomId, String)>,
    pub mail_from: String,
    pub owner_email: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable source. Unset variables take their
    /// defaults; set but malformed ones are errors.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = get("HOTEL_DATA_DIR").unwrap_or_else(|| "./data".into());

        let metrics_port = match get("HOTEL_METRICS_PORT") {
            Some(v) => Some(parse_num("HOTEL_METRICS_PORT", v)?),
            None => None,
        };
        let compact_threshold = match get("HOTEL_COMPACT_THRESHOLD") {
            Some(v) => parse_num("HOTEL_COMPACT_THRESHOLD", v)?,
            None => 1000,
        };
        let timeout_ms: u64 = match get("HOTEL_STORE_TIMEOUT_MS") {
            Some(v) => parse_num("HOTEL_STORE_TIMEOUT_MS", v)?,
            None => 3000,
        };
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "HOTEL_STORE_TIMEOUT_MS",
                value: "0".into(),
                reason: "must be positive",
            });
        }
        let rooms = parse_rooms(&get("HOTEL_ROOMS").unwrap_or_else(|| DEFAULT_ROOMS.into()))?;

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            compact_threshold,
            store_timeout: Duration::from_millis(timeout_ms),
            rooms,
            mail_from: get("HOTEL_MAIL_FROM").unwrap_or_else(|| "reservations@hotel.local".into()),
            owner_email: get("HOTEL_OWNER_EMAIL").unwrap_or_else(|| "owner@hotel.local".into()),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}

fn parse_num<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value,
        reason: "not a valid number",
    })
}

/// `id=name` pairs separated by `;`. Blank entries are skipped.
fn parse_rooms(s: &str) -> Result<Vec<(RoomId, String)>, ConfigError> {
    let invalid = |reason| ConfigError::Invalid {
        var: "HOTEL_ROOMS",
        value: s.to_string(),
        reason,
    };
    let mut rooms = Vec::new();
    for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, name) = entry.split_once('=').ok_or_else(|| invalid("expected id=name"))?;
        let id: RoomId = id.trim().parse().map_err(|_| invalid("room id must be a number"))?;
        let name = name.trim();
        if id == 0 || name.is_empty() {
            return Err(invalid("room id must be positive and name non-empty"));
        }
        if rooms.iter().any(|(existing, _)| *existing == id) {
            return Err(invalid("duplicate room id"));
        }
        rooms.push((id, name.to_string()));
    }
    Ok(rooms)
}
