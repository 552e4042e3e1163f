use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

/// Picks the best available backend for the mapping, preferring CUDA over
/// Metal over CPU.
pub fn select_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            tracing::warn!("no accelerator available, running on CPU (build with --features cuda or metal)");
            Ok(Device::Cpu)
        }
    }
}

/// Backend name the mapping would resolve to, without touching the device.
/// Reported by `/health` and in response metadata.
pub fn device_label(device_map: DeviceMap) -> &'static str {
    match device_map {
        DeviceMap::ForceCpu => "cpu",
        DeviceMap::Ordinal(_) if cuda_is_available() => "cuda",
        DeviceMap::Ordinal(_) if metal_is_available() => "metal",
        DeviceMap::Ordinal(_) => "cpu",
    }
}

/// Half precision on accelerators, full precision on CPU.
pub fn default_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::F16
    }
}

/// Wire name for a dtype, as echoed in response metadata.
pub fn dtype_label(dtype: DType) -> &'static str {
    match dtype {
        DType::F16 => "float16",
        _ => "float32",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_cpu_selects_cpu() {
        let device = select_device(DeviceMap::ForceCpu).unwrap();
        assert!(device.is_cpu());
        assert_eq!(device_label(DeviceMap::ForceCpu), "cpu");
    }

    #[test]
    fn test_cpu_runs_full_precision() {
        assert_eq!(default_dtype(&Device::Cpu), DType::F32);
        assert_eq!(dtype_label(DType::F32), "float32");
        assert_eq!(dtype_label(DType::F16), "float16");
    }
}
