// ABOUTME: Narrow async façade over the container runtime endpoint.
// ABOUTME: Trait per concern (image, container, network) with a bollard-backed driver.

mod bollard;
mod container;
mod image;
mod network;
mod shared_types;

pub use self::bollard::BollardRuntime;
pub use container::{ContainerError, ContainerFilters, ContainerOps};
pub use image::{ImageError, ImageOps, RegistryAuth};
pub use network::{NetworkConfig, NetworkError, NetworkInspect, NetworkOps};
pub use shared_types::{
    BindMount, ContainerConfig, ContainerInfo, ContainerState, ContainerSummary, LogConfig,
    NetworkAttachment, ResourceLimits,
};

/// The full runtime surface the engine needs. Blanket-implemented for any
/// driver providing the three concerns.
pub trait Runtime: ImageOps + ContainerOps + NetworkOps {}

impl<T: ImageOps + ContainerOps + NetworkOps> Runtime for T {}
