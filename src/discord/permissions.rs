//! Discord permission bitmasks.
//!
//! Discord sends permissions as a decimal string because the value exceeds
//! what a JSON double can hold exactly. They are parsed straight into a
//! `u64`, never through a float.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// A guild permission bitfield as returned by `GET /users/@me/guilds`.
    ///
    /// Only the bits the dashboard inspects are named; every other bit is
    /// retained untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const KICK_MEMBERS      = 1 << 1;
        const BAN_MEMBERS       = 1 << 2;
        const ADMINISTRATOR     = 1 << 3;
        const MANAGE_CHANNELS   = 1 << 4;
        const VIEW_AUDIT_LOG    = 1 << 7;
        const MANAGE_MESSAGES   = 1 << 13;
        /// Timeout members
        const MODERATE_MEMBERS  = 1 << 40;

        // Unnamed bits are part of the value
        const _ = !0;
    }
}

/// Any one of these bits is enough for dashboard access.
pub const MODERATOR_MASK: Permissions = Permissions::ADMINISTRATOR
    .union(Permissions::KICK_MEMBERS)
    .union(Permissions::BAN_MEMBERS)
    .union(Permissions::MANAGE_CHANNELS)
    .union(Permissions::MANAGE_MESSAGES)
    .union(Permissions::MODERATE_MEMBERS)
    .union(Permissions::VIEW_AUDIT_LOG);

impl Default for Permissions {
    fn default() -> Self {
        Self::empty()
    }
}

impl Permissions {
    /// True if any moderator-level bit is set.
    pub const fn is_moderator(self) -> bool {
        self.intersects(MODERATOR_MASK)
    }
}

impl std::str::FromStr for Permissions {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self::from_bits_retain)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older API versions sent a bare integer
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Number(u64),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Wire::Number(n) => Ok(Self::from_bits_retain(n)),
        }
    }
}
