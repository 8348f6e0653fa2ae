//! Model loading: device selection, the candle network and the shared cache.

pub mod backbone;
pub mod config;
pub mod device;
pub mod handle;
pub mod head;
pub mod registry;

pub use backbone::Backbone;
pub use config::ModelConfig;
pub use device::{
    DeviceKind, DeviceProfile, DeviceRequest, DeviceSelector, GpuDetails, GpuProbe,
    StaticGpuProbe, SystemGpuProbe,
};
pub use handle::{ModelHandle, PropertyModel};
pub use head::PropertyHead;
pub use registry::ModelRegistry;
