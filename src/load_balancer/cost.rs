//! Backend roles and the fixed role × type cost table.
//!
//! ```text
//!          VIDEO  MUSIC
//! 'M'        2      1
//! 'V'        1      3
//! 'P'        1      2
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::request::{Request, RequestType};

/// Media specialization of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "VIDEO")]
    Video,
    #[serde(alias = "MUSIC")]
    Music,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Video => "video",
            Role::Music => "music",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slowdown factor for serving `kind` on a backend of `role`.
pub fn multiplier(kind: RequestType, role: Role) -> u32 {
    match (kind, role) {
        (RequestType::Music, Role::Video) => 2,
        (RequestType::Music, Role::Music) => 1,
        (RequestType::Video, Role::Video) => 1,
        (RequestType::Video, Role::Music) => 3,
        (RequestType::Photo, Role::Video) => 1,
        (RequestType::Photo, Role::Music) => 2,
    }
}

/// Projected processing time of `request` on a backend of `role`.
pub fn service_time(request: &Request, role: Role) -> Duration {
    let units = multiplier(request.kind, role) * u32::from(request.base_cost.get());
    Duration::from_secs(u64::from(units))
}
