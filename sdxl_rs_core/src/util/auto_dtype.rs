use std::fmt::Display;

use anyhow::Result;
use sdxl_rs_common::core::{DType, Device, Tensor};
use tracing::info;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, clap::ValueEnum)]
/// DType for the model weights and activations.
///
/// Note: `Auto` uses F32 on the CPU, otherwise the first of F16 -> BF16 the device can multiply with,
/// then F32.
pub enum ModelDType {
    Auto,
    BF16,
    #[default]
    F16,
    F32,
}

impl Display for ModelDType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::BF16 => write!(f, "bf16"),
            Self::F16 => write!(f, "f16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

/// Type which can be converted to a DType
pub trait TryIntoDType {
    fn try_into_dtype(&self, device: &Device, silent: bool) -> Result<DType>;
}

impl TryIntoDType for DType {
    fn try_into_dtype(&self, _: &Device, silent: bool) -> Result<DType> {
        if !matches!(self, DType::BF16 | DType::F32 | DType::F16) {
            anyhow::bail!("DType must be one of BF16, F16, F32");
        }
        if !silent {
            info!("dtype selected is {self:?}.");
        }
        Ok(*self)
    }
}

fn supports_matmul(device: &Device, dtype: DType) -> bool {
    Tensor::zeros((2, 2), dtype, device)
        .and_then(|x| x.matmul(&x))
        .is_ok()
}

fn determine_auto_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        return DType::F32;
    }
    [DType::F16, DType::BF16]
        .into_iter()
        .find(|dtype| supports_matmul(device, *dtype))
        .unwrap_or(DType::F32)
}

impl TryIntoDType for ModelDType {
    fn try_into_dtype(&self, device: &Device, silent: bool) -> Result<DType> {
        let dtype = match self {
            Self::Auto => determine_auto_dtype(device),
            Self::BF16 => DType::BF16,
            Self::F16 => DType::F16,
            Self::F32 => DType::F32,
        };
        if !silent {
            info!("dtype selected is {dtype:?}.");
        }
        Ok(dtype)
    }
}

#[cfg(test)]
mod tests {
    use sdxl_rs_common::core::{DType, Device};

    use super::{ModelDType, TryIntoDType};

    #[test]
    fn auto_is_f32_on_cpu() -> anyhow::Result<()> {
        assert_eq!(ModelDType::Auto.try_into_dtype(&Device::Cpu, true)?, DType::F32);
        assert_eq!(ModelDType::F16.try_into_dtype(&Device::Cpu, true)?, DType::F16);
        Ok(())
    }

    #[test]
    fn rejects_integer_dtypes() {
        assert!(DType::U8.try_into_dtype(&Device::Cpu, true).is_err());
        assert!(DType::BF16.try_into_dtype(&Device::Cpu, true).is_ok());
    }

    #[test]
    fn default_matches_half_precision_weights() {
        assert_eq!(ModelDType::default(), ModelDType::F16);
        assert_eq!(ModelDType::default().to_string(), "f16");
    }
}
