//! Backend abstraction - Multi-backend support
//!
//! NdArray (CPU) by default, CUDA when built with the `cuda` feature.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

use crate::config::DeviceSelector;
use crate::utils::error::{Result, SiameseError};

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (feature) or NdArray (default)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device type shared by the default backend and its autodiff wrapper
pub type Device = <DefaultBackend as Backend>::Device;

/// Map a device selector onto a device of the compiled backend
pub fn resolve_device(selector: &DeviceSelector) -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        match selector {
            DeviceSelector::Cuda(index) => Ok(burn_cuda::CudaDevice::new(*index)),
            DeviceSelector::Cpu => Err(SiameseError::Config(
                "device 'cpu' requested but this build uses the CUDA backend".to_string(),
            )),
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        match selector {
            DeviceSelector::Cpu => Ok(burn_ndarray::NdArrayDevice::Cpu),
            DeviceSelector::Cuda(_) => Err(SiameseError::Config(format!(
                "device '{}' requested but this build has no CUDA support (enable the `cuda` feature)",
                selector
            ))),
        }
    }
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}
