use std::{fmt, str::FromStr};

use candle_core::{
    utils::{cuda_is_available, metal_is_available},
    Device,
};
use thiserror::Error;
use tracing::{info, warn};

/// Which hardware backend to run the pipelines on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceSelection {
    Cpu,
    /// The first accelerator available to this build (CUDA, then Metal), or the CPU if none is.
    #[default]
    Accelerator,
    /// A specific accelerator by ordinal. Fails if this build has no accelerator backend.
    AcceleratorId(usize),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeviceError {
    #[error("invalid device `{0}`, expected `cpu`, `accelerator` or `accelerator:<id>`")]
    Parse(String),
    #[error("accelerator {0} requested but this build has neither CUDA nor Metal support")]
    Unavailable(usize),
}

impl FromStr for DeviceSelection {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.split_once(':') {
            None => match lower.as_str() {
                "cpu" => Ok(Self::Cpu),
                "accelerator" | "gpu" | "mps" | "cuda" | "metal" => Ok(Self::Accelerator),
                _ => Err(DeviceError::Parse(s.to_string())),
            },
            Some(("accelerator" | "gpu" | "cuda" | "metal", id)) => id
                .parse()
                .map(Self::AcceleratorId)
                .map_err(|_| DeviceError::Parse(s.to_string())),
            Some(_) => Err(DeviceError::Parse(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator => write!(f, "accelerator"),
            Self::AcceleratorId(id) => write!(f, "accelerator:{id}"),
        }
    }
}

impl DeviceSelection {
    pub fn resolve(&self) -> anyhow::Result<Device> {
        let device = match self {
            Self::Cpu => Device::Cpu,
            Self::Accelerator => match Self::new_accelerator(0)? {
                Some(device) => device,
                None => {
                    warn!("no accelerator available, falling back to the CPU.");
                    Device::Cpu
                }
            },
            Self::AcceleratorId(id) => {
                Self::new_accelerator(*id)?.ok_or(DeviceError::Unavailable(*id))?
            }
        };
        info!("running on device {:?}.", device.location());
        Ok(device)
    }

    fn new_accelerator(ordinal: usize) -> anyhow::Result<Option<Device>> {
        if cuda_is_available() {
            Ok(Some(Device::new_cuda(ordinal)?))
        } else if metal_is_available() {
            Ok(Some(Device::new_metal(ordinal)?))
        } else {
            Ok(None)
        }
    }
}
