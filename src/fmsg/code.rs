// Per-recipient delivery outcome codes

use std::fmt;

/// Single-byte delivery outcome sent back to the sending host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectAcceptCode {
    Undisclosed = 1,
    TooBig = 2,
    InsufficientResources = 3,
    ParentNotFound = 4,
    PastTime = 5,
    FutureTime = 6,
    TimeTravel = 7,
    UserUnknown = 100,
    UserFull = 101,
    Accept = 255,
}

/// Codes below this value reject the whole batch for a host
pub const HOST_LEVEL_LIMIT: u8 = 100;

impl RejectAcceptCode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_accept(self) -> bool {
        self == RejectAcceptCode::Accept
    }

    /// Host-level codes apply to every recipient at that host
    pub fn is_host_level(self) -> bool {
        self.as_byte() < HOST_LEVEL_LIMIT
    }
}

impl TryFrom<u8> for RejectAcceptCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let code = match value {
            1 => RejectAcceptCode::Undisclosed,
            2 => RejectAcceptCode::TooBig,
            3 => RejectAcceptCode::InsufficientResources,
            4 => RejectAcceptCode::ParentNotFound,
            5 => RejectAcceptCode::PastTime,
            6 => RejectAcceptCode::FutureTime,
            7 => RejectAcceptCode::TimeTravel,
            100 => RejectAcceptCode::UserUnknown,
            101 => RejectAcceptCode::UserFull,
            255 => RejectAcceptCode::Accept,
            other => return Err(other),
        };
        Ok(code)
    }
}

impl fmt::Display for RejectAcceptCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectAcceptCode::Undisclosed => "undisclosed",
            RejectAcceptCode::TooBig => "too big",
            RejectAcceptCode::InsufficientResources => "insufficient resources",
            RejectAcceptCode::ParentNotFound => "parent not found",
            RejectAcceptCode::PastTime => "past time",
            RejectAcceptCode::FutureTime => "future time",
            RejectAcceptCode::TimeTravel => "time travel",
            RejectAcceptCode::UserUnknown => "user unknown",
            RejectAcceptCode::UserFull => "user full",
            RejectAcceptCode::Accept => "accept",
        };
        f.write_str(name)
    }
}
