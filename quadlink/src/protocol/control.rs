//! State and Command payloads
//!
//! ```text
//! State   := basic:u8 gait:u8
//! Command := switch:u8 gait:u8 rc:u8
//! ```

use crate::error::{Error, Result};

/// Robot status report (robot → monitor)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemState {
    /// Basic status byte
    pub basic: u8,
    /// Active gait
    pub gait: u8,
}

impl SystemState {
    /// Encoded body length
    pub const LEN: usize = 2;

    pub fn encode(&self) -> [u8; Self::LEN] {
        [self.basic, self.gait]
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        match *body {
            [basic, gait] => Ok(Self { basic, gait }),
            _ => Err(Error::LengthMismatch {
                expected: Self::LEN,
                actual: body.len(),
            }),
        }
    }
}

/// Operator command (monitor → robot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandState {
    /// Motion enable switch
    pub switch: u8,
    /// Requested gait
    pub gait: u8,
    /// Remote-control mode
    pub rc: u8,
}

impl CommandState {
    /// Encoded body length
    pub const LEN: usize = 3;

    pub fn encode(&self) -> [u8; Self::LEN] {
        [self.switch, self.gait, self.rc]
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        match *body {
            [switch, gait, rc] => Ok(Self { switch, gait, rc }),
            _ => Err(Error::LengthMismatch {
                expected: Self::LEN,
                actual: body.len(),
            }),
        }
    }
}
