use std::fmt;
use std::str::FromStr;

/// Ordinal severity carried by every packet.
///
/// The engine itself never filters on levels; the value travels in the
/// packet header so the receiving console can. `Control` is reserved for
/// administrative packets such as clear commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Verbose = 1,
    Message = 2,
    Warning = 3,
    Error = 4,
    Fatal = 5,
    Control = 6,
}

impl Default for Level {
    fn default() -> Self {
        Self::Message
    }
}

impl Level {
    pub(crate) fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Debug),
            1 => Some(Self::Verbose),
            2 => Some(Self::Message),
            3 => Some(Self::Warning),
            4 => Some(Self::Error),
            5 => Some(Self::Fatal),
            6 => Some(Self::Control),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "DEBUG",
            Level::Verbose => "VERBOSE",
            Level::Message => "MESSAGE",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
            Level::Control => "CONTROL",
        };
        f.write_str(s)
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "VERBOSE" => Ok(Self::Verbose),
            "MESSAGE" => Ok(Self::Message),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            "CONTROL" => Ok(Self::Control),
            _ => Err(()),
        }
    }
}
