//! Device boundary of the warp stage.
//!
//! The stage never talks to a GPU API directly; it describes images and
//! dispatch grids with the types below and hands them to a [`WarpDevice`].
//! The production backend lives in [`crate::gpu_device`]; tests drive the
//! stage through a scripted mock.

use thiserror::Error;

use crate::surface::VideoSurface;
use crate::warp_config::WarpConfig;

#[derive(Debug, Error)]
pub enum WarpError {
    /// Input or output plane memory could not be wrapped as a device image.
    /// Skips the frame; never fatal to the pipeline.
    #[error("image memory not available: {0}")]
    MemoryUnavailable(String),
    /// Kernel program failed to build. Fatal at construction time.
    #[error("kernel build failed: {0}")]
    BuildError(String),
    /// Kernel built but failed post-build validation. Fatal at construction.
    #[error("kernel invalid after build: {0}")]
    InvalidKernel(String),
    /// No suitable GPU adapter on this system.
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("device request failed: {0}")]
    DeviceRequest(String),
}

/// Component layout of a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    R,
    Rg,
    Rgba,
}

/// Per-component storage type of a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDataType {
    Unorm8,
    Uint16,
    Uint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub data_type: ChannelDataType,
}

impl ImageFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        let per_channel = match self.data_type {
            ChannelDataType::Unorm8 => 1,
            ChannelDataType::Uint16 => 2,
            ChannelDataType::Uint32 => 4,
        };
        let channels = match self.order {
            ChannelOrder::R => 1,
            ChannelOrder::Rg => 2,
            ChannelOrder::Rgba => 4,
        };
        per_channel * channels
    }
}

/// Shape of one device image: format, pixel dimensions, and the byte stride
/// of the underlying plane rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
}

/// Compute dispatch footprint: fixed local work-group plus a global grid
/// already rounded up to whole work-groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSize {
    pub local: [u32; 2],
    pub global: [u32; 2],
}

/// Build-time options handed to the kernel compiler, as name/value defines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelBuildOptions {
    pub defines: Vec<(String, i32)>,
}

impl KernelBuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(mut self, name: &str, value: i32) -> Self {
        self.defines.push((name.to_string(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.defines
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// Exactly the three arguments the warp kernel consumes, in kernel order.
pub struct KernelArgs<I> {
    /// Oldest in-flight input image (the ring front).
    pub input: I,
    pub output: I,
    /// Adapted config snapshot, passed by value under the raw byte contract.
    pub config: WarpConfig,
}

/// Callback the device runs once an enqueued invocation completes. May run
/// on any thread.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Contract this stage consumes from the GPU runtime.
///
/// Submission is non-blocking on an in-order queue; completion callbacks
/// fire in submission order.
pub trait WarpDevice: Send + Sync + 'static {
    type Image: Clone + Send + Sync + 'static;
    type Kernel: Send + Sync + 'static;

    /// Wrap one plane of `surface` as a device image described by `desc`,
    /// starting `offset` bytes into the backing allocation.
    fn wrap_image(
        &self,
        surface: &VideoSurface,
        desc: &ImageDesc,
        offset: u32,
    ) -> Result<Self::Image, WarpError>;

    /// Compile `source` into the kernel named `name` with the given
    /// build options.
    fn build_kernel(
        &self,
        source: &str,
        name: &str,
        options: &KernelBuildOptions,
    ) -> Result<Self::Kernel, WarpError>;

    /// Submit one invocation; `on_complete` runs when the device signals it.
    fn enqueue(
        &self,
        kernel: &Self::Kernel,
        args: &KernelArgs<Self::Image>,
        work: &WorkSize,
        on_complete: Completion,
    ) -> Result<(), WarpError>;
}

pub(crate) fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

pub(crate) fn align_down(value: u32, align: u32) -> u32 {
    value / align * align
}

// ============================================================================
// Mock device (tests)
// ============================================================================
