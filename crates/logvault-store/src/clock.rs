//! Default timestamps in the store's time zone.

use chrono::{Local, Utc};
use chrono_tz::Tz;

use crate::errors::{Result, StoreError};

/// Produces RFC 3339 timestamps with an offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreClock {
    /// The host's local offset.
    #[default]
    Local,
    /// A named IANA zone.
    Zone(Tz),
}

impl StoreClock {
    /// Build a clock from an optional IANA zone name.
    pub fn from_config(timezone: Option<&str>) -> Result<Self> {
        match timezone {
            None => Ok(Self::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(Self::Zone)
                .map_err(|e| StoreError::Config(format!("timezone '{name}': {e}"))),
        }
    }

    /// Current time as RFC 3339 with offset.
    pub fn now(&self) -> String {
        match self {
            Self::Local => Local::now().to_rfc3339(),
            Self::Zone(tz) => Utc::now().with_timezone(tz).to_rfc3339(),
        }
    }
}
