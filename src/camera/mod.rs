//! Entry and exit camera lifecycle.

mod manager;
mod recovery;
mod stream;

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

pub use manager::{AvailableCamera, CameraManager, CameraStatus, ConfigureReport, ResetReport};
pub use recovery::{CommandStep, ServiceRestarter};
pub use stream::{CameraStream, ConnectReport, DriverAttempt};

/// Which side of the gate a camera watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Entry,
    Exit,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Entry, Role::Exit];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Entry => "entry",
            Role::Exit => "exit",
        })
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "entry" => Ok(Role::Entry),
            "exit" => Ok(Role::Exit),
            other => Err(anyhow!("unknown camera role {:?}", other)),
        }
    }
}
