//! Demonstration kernels. Real deployments register their own factories;
//! these exist to exercise the dispatch pipeline end to end.

pub mod echo;
pub mod echo_multi;
pub mod invert_image;

use std::sync::Arc;

use tensorgate_runtime::KernelRegistry;

pub use echo::EchoKernel;
pub use echo_multi::EchoMultiKernel;
pub use invert_image::InvertImageKernel;

/// Register every demonstration kernel on a fresh registry.
pub fn default_registry() -> Arc<KernelRegistry> {
    let registry = KernelRegistry::new();
    registry.register("echo", || Box::new(EchoKernel::default()));
    registry.register("echo_multi", || Box::new(EchoMultiKernel::default()));
    registry.register("invert_image", || Box::new(InvertImageKernel::default()));
    Arc::new(registry)
}
