//! # stabwarp Core
//!
//! Per-frame GPU projective warp stage for video stabilization. Y and UV
//! planes of an NV12 frame are warped independently by compute kernels
//! driven by a 3x3 projective transform supplied by a motion-estimation
//! stage.

// ============================================================================
// Device boundary
// ============================================================================
pub mod device;
pub mod gpu_device;
pub mod surface;

// ============================================================================
// Warp stage
// ============================================================================
pub mod image_ring;
pub mod warp_config;
pub mod warp_handler;
pub mod warp_kernel;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
