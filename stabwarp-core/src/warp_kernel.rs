//! Per-channel projective warp kernel.
//!
//! One [`ChannelWarpKernel`] exists per plane of the frame (luma, chroma).
//! Each frame it snapshots the live [`WarpConfig`], adapts it for 4:2:0
//! subsampling on the chroma side, wraps the input/output planes as device
//! images and emits the three kernel arguments plus the dispatch grid. The
//! input image enters the channel's [`InputImageRing`] and is released in
//! FIFO order once the device reports the warp complete.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::device::{
    align_down, align_up, ChannelDataType, ChannelOrder, ImageDesc, ImageFormat, KernelArgs,
    KernelBuildOptions, WarpDevice, WarpError, WorkSize,
};
use crate::image_ring::InputImageRing;
use crate::surface::VideoSurface;
use crate::warp_config::{WarpConfig, WarpConfigCell};

/// Fixed local work-group footprint of the warp kernels.
pub const WARP_WG_WIDTH: u32 = 8;
pub const WARP_WG_HEIGHT: u32 = 4;

// ============================================================================
// Channel identity
// ============================================================================

/// Image plane a kernel instance warps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum WarpChannel {
    Luma,
    Chroma,
}

impl WarpChannel {
    /// Plane index inside an NV12 surface.
    pub fn plane_index(self) -> usize {
        match self {
            Self::Luma => 0,
            Self::Chroma => 1,
        }
    }

    /// Input sampling format: one 8-bit component for Y, two for UV.
    pub fn input_format(self) -> ImageFormat {
        match self {
            Self::Luma => ImageFormat {
                order: ChannelOrder::R,
                data_type: ChannelDataType::Unorm8,
            },
            Self::Chroma => ImageFormat {
                order: ChannelOrder::Rg,
                data_type: ChannelDataType::Unorm8,
            },
        }
    }

    /// Kernel entry name for this channel.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Self::Luma => "warp_y",
            Self::Chroma => "warp_uv",
        }
    }

    fn warp_y_flag(self) -> i32 {
        match self {
            Self::Luma => 1,
            Self::Chroma => 0,
        }
    }
}

/// Output pixel encoding. Fixed when the kernel is built; never switched
/// mid-pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OutputMode {
    /// Eight horizontal warp results packed into one wide integer texel
    /// (16-bit lanes for Y, 32-bit for UV) for write bandwidth.
    PackedUint,
    /// One 8-bit normalized texel per pixel, same shape as the input.
    Normalized,
}

impl OutputMode {
    /// Kernel source variant for this encoding.
    pub fn kernel_source(self) -> &'static str {
        match self {
            Self::PackedUint => WARP_SHADER_PACKED,
            Self::Normalized => WARP_SHADER_NORMALIZED,
        }
    }
}

/// Input image descriptor for one channel of `surface`.
pub(crate) fn input_image_desc(channel: WarpChannel, surface: &VideoSurface) -> ImageDesc {
    let p = channel.plane_index();
    ImageDesc {
        format: channel.input_format(),
        width: surface.width >> p,
        height: surface.height >> p,
        row_pitch: surface.strides[p],
    }
}

/// Output image descriptor for one channel of `surface` under `mode`.
pub(crate) fn output_image_desc(
    mode: OutputMode,
    channel: WarpChannel,
    surface: &VideoSurface,
) -> ImageDesc {
    let p = channel.plane_index();
    let plane_width = surface.width >> p;
    let plane_height = surface.height >> p;
    match mode {
        OutputMode::PackedUint => ImageDesc {
            format: ImageFormat {
                order: ChannelOrder::Rgba,
                data_type: match channel {
                    WarpChannel::Luma => ChannelDataType::Uint16,
                    WarpChannel::Chroma => ChannelDataType::Uint32,
                },
            },
            // Eight source pixels fold into one wide texel.
            width: align_down(plane_width, 4) / 8,
            height: plane_height,
            row_pitch: surface.strides[p],
        },
        OutputMode::Normalized => ImageDesc {
            format: channel.input_format(),
            width: plane_width,
            height: plane_height,
            row_pitch: surface.strides[p],
        },
    }
}

// ============================================================================
// Channel kernel
// ============================================================================

/// One channel's warp kernel: owns its in-flight input ring and the built
/// device kernel, and reads the live config from the shared cell.
pub struct ChannelWarpKernel<D: WarpDevice> {
    device: Arc<D>,
    channel: WarpChannel,
    mode: OutputMode,
    kernel: D::Kernel,
    config: Arc<WarpConfigCell>,
    ring: InputImageRing<D::Image>,
    input_frame_id: AtomicI64,
    warp_frame_id: AtomicI64,
    in_flight: Mutex<usize>,
    idle: Condvar,
}

impl<D: WarpDevice> ChannelWarpKernel<D> {
    /// Build the kernel variant for `channel`, specialized through the
    /// `WARP_Y` build flag. Build or validation failure aborts construction.
    pub fn new(
        device: Arc<D>,
        channel: WarpChannel,
        mode: OutputMode,
        config: Arc<WarpConfigCell>,
    ) -> Result<Self, WarpError> {
        let name = channel.kernel_name();
        let options = KernelBuildOptions::new().define("WARP_Y", channel.warp_y_flag());
        let kernel = device.build_kernel(mode.kernel_source(), name, &options)?;
        tracing::debug!("built warp kernel {name} ({mode:?})");
        Ok(Self {
            device,
            channel,
            mode,
            kernel,
            config,
            ring: InputImageRing::new(),
            input_frame_id: AtomicI64::new(-1),
            warp_frame_id: AtomicI64::new(-1),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
        })
    }

    pub fn channel(&self) -> WarpChannel {
        self.channel
    }

    /// Frames whose input plane has been wrapped and ring-tracked so far.
    pub fn input_frames(&self) -> i64 {
        self.input_frame_id.load(Ordering::Relaxed)
    }

    /// Frames whose warp the device has completed with a primed config.
    pub fn warped_frames(&self) -> i64 {
        self.warp_frame_id.load(Ordering::Relaxed)
    }

    /// Inputs still held alive for in-flight or backlogged invocations.
    pub fn in_flight_inputs(&self) -> usize {
        self.ring.len()
    }

    pub(crate) fn kernel(&self) -> &D::Kernel {
        &self.kernel
    }

    /// Build the three kernel arguments and the dispatch grid for one frame.
    ///
    /// The input plane is wrapped first but enters the ring only once the
    /// output wrap has also succeeded, so a skipped frame leaves the ring
    /// exactly as it was.
    pub fn prepare_arguments(
        &self,
        input: &VideoSurface,
        output: &VideoSurface,
    ) -> Result<(KernelArgs<D::Image>, WorkSize), WarpError> {
        let p = self.channel.plane_index();

        let desc_in = input_image_desc(self.channel, input);
        let image_in = self
            .device
            .wrap_image(input, &desc_in, input.offsets[p])
            .map_err(|err| {
                tracing::warn!(
                    "kernel {}: input plane wrap failed: {err}",
                    self.channel.kernel_name()
                );
                err
            })?;

        let mut config = self.config.get();
        config.clamp_trim_ratio();
        if self.channel == WarpChannel::Chroma {
            config.adapt_for_chroma();
        }

        let desc_out = output_image_desc(self.mode, self.channel, output);
        let image_out = self
            .device
            .wrap_image(output, &desc_out, output.offsets[p])
            .map_err(|err| {
                tracing::warn!(
                    "kernel {}: output plane wrap failed: {err}",
                    self.channel.kernel_name()
                );
                err
            })?;

        // The ring front, not the fresh wrap, feeds the kernel: dispatch
        // lags capture by however many inputs are still in flight.
        let ring_front = self.ring.push(image_in);
        let input_frame = self.input_frame_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            "kernel {}: input frame {input_frame}, ring depth {}, config frame {} proj_mat={:?}",
            self.channel.kernel_name(),
            self.ring.len(),
            config.frame_id,
            config.proj_mat
        );

        let work = WorkSize {
            local: [WARP_WG_WIDTH, WARP_WG_HEIGHT],
            global: [
                align_up(desc_out.width, WARP_WG_WIDTH),
                align_up(desc_out.height, WARP_WG_HEIGHT),
            ],
        };

        Ok((
            KernelArgs {
                input: ring_front,
                output: image_out,
                config,
            },
            work,
        ))
    }

    /// Post-completion bookkeeping for one finished invocation. `config` is
    /// the snapshot that was bound to that invocation.
    ///
    /// A primed config releases the oldest in-flight input; an unprimed one
    /// leaves the ring untouched (the slot stays subject to eviction on
    /// future pushes). The generic invocation completion always runs last.
    pub fn post_execute(&self, config: &WarpConfig) {
        if config.valid > 0 {
            let warp_frame = self.warp_frame_id.fetch_add(1, Ordering::Relaxed) + 1;
            self.ring.pop();
            tracing::debug!(
                "kernel {}: released input for warp frame {warp_frame} (config frame {}), ring depth {}",
                self.channel.kernel_name(),
                config.frame_id,
                self.ring.len()
            );
        }
        self.finish_invocation();
    }

    pub(crate) fn invocation_enqueued(&self) {
        *self.in_flight.lock() += 1;
    }

    /// Generic completion shared by every invocation: drop the in-flight
    /// slot and wake anyone draining this kernel.
    pub(crate) fn finish_invocation(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until every enqueued invocation has completed.
    pub fn wait_idle(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.idle.wait(&mut in_flight);
        }
    }
}

// ============================================================================
// Kernel sources (WGSL)
// ============================================================================

/// Packed-integer warp: one invocation resolves eight horizontal pixels and
/// writes them as wide integer lanes.
const WARP_SHADER_PACKED: &str = r#"
struct WarpConfig {
    frame_id: i32,
    valid: i32,
    width: i32,
    height: i32,
    trim_ratio: f32,
    m0: f32, m1: f32, m2: f32,
    m3: f32, m4: f32, m5: f32,
    m6: f32, m7: f32, m8: f32,
    _pad0: f32,
    _pad1: f32,
}

struct PlaneLayout {
    in_width: u32,
    in_height: u32,
    in_pitch: u32,
    out_width: u32,
    out_height: u32,
    out_pitch: u32,
    _pad0: u32,
    _pad1: u32,
}

override WARP_Y: u32 = 1u;

@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> config: WarpConfig;
@group(0) @binding(3) var<uniform> plane: PlaneLayout;

fn load_byte(idx: u32) -> f32 {
    let word = src[idx / 4u];
    return f32((word >> ((idx % 4u) * 8u)) & 0xffu) / 255.0;
}

// Out-of-frame fill: black for luma, the neutral midpoint for chroma.
fn border_level() -> f32 {
    if WARP_Y == 1u {
        return 0.0;
    }
    return 0.5;
}

// Inverse mapping: for each output pixel, project back into the source.
fn warp_coord(x: f32, y: f32) -> vec2<f32> {
    let w = config.m6 * x + config.m7 * y + config.m8;
    if abs(w) < 1e-6 {
        return vec2<f32>(-1.0, -1.0);
    }
    return vec2<f32>(
        (config.m0 * x + config.m1 * y + config.m2) / w,
        (config.m3 * x + config.m4 * y + config.m5) / w,
    );
}

fn trimmed(pos: vec2<f32>) -> bool {
    let tx = config.trim_ratio * f32(plane.in_width);
    let ty = config.trim_ratio * f32(plane.in_height);
    return pos.x < tx || pos.y < ty
        || pos.x > f32(plane.in_width) - 1.0 - tx
        || pos.y > f32(plane.in_height) - 1.0 - ty;
}

fn load_luma(x: i32, y: i32) -> f32 {
    if x < 0 || y < 0 || x >= i32(plane.in_width) || y >= i32(plane.in_height) {
        return border_level();
    }
    return load_byte(u32(y) * plane.in_pitch + u32(x));
}

fn sample_luma(pos: vec2<f32>) -> f32 {
    let x0 = i32(floor(pos.x));
    let y0 = i32(floor(pos.y));
    let fx = fract(pos.x);
    let fy = fract(pos.y);
    let top = mix(load_luma(x0, y0), load_luma(x0 + 1, y0), fx);
    let bottom = mix(load_luma(x0, y0 + 1), load_luma(x0 + 1, y0 + 1), fx);
    return mix(top, bottom, fy);
}

fn warp_luma(x: u32, y: u32) -> f32 {
    let pos = warp_coord(f32(x), f32(y));
    if trimmed(pos) {
        return border_level();
    }
    return sample_luma(pos);
}

fn load_chroma(x: i32, y: i32) -> vec2<f32> {
    if x < 0 || y < 0 || x >= i32(plane.in_width) || y >= i32(plane.in_height) {
        return vec2<f32>(border_level(), border_level());
    }
    let idx = u32(y) * plane.in_pitch + u32(x) * 2u;
    return vec2<f32>(load_byte(idx), load_byte(idx + 1u));
}

fn sample_chroma(pos: vec2<f32>) -> vec2<f32> {
    let x0 = i32(floor(pos.x));
    let y0 = i32(floor(pos.y));
    let fx = vec2<f32>(fract(pos.x));
    let fy = vec2<f32>(fract(pos.y));
    let top = mix(load_chroma(x0, y0), load_chroma(x0 + 1, y0), fx);
    let bottom = mix(load_chroma(x0, y0 + 1), load_chroma(x0 + 1, y0 + 1), fx);
    return mix(top, bottom, fy);
}

fn warp_chroma(x: u32, y: u32) -> vec2<f32> {
    let pos = warp_coord(f32(x), f32(y));
    if trimmed(pos) {
        return vec2<f32>(border_level(), border_level());
    }
    return sample_chroma(pos);
}

fn quantize(v: f32) -> u32 {
    return u32(clamp(v, 0.0, 1.0) * 255.0 + 0.5);
}

// One output texel is four 16-bit lanes packing eight warped luma pixels.
@compute @workgroup_size(8, 4)
fn warp_y(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= plane.out_width || gid.y >= plane.out_height {
        return;
    }
    let x0 = gid.x * 8u;
    let base = (gid.y * plane.out_pitch + gid.x * 8u) / 4u;
    for (var i = 0u; i < 2u; i = i + 1u) {
        var word = 0u;
        for (var b = 0u; b < 4u; b = b + 1u) {
            word = word | (quantize(warp_luma(x0 + i * 4u + b, gid.y)) << (b * 8u));
        }
        dst[base + i] = word;
    }
}

// One output texel is four 32-bit lanes packing eight warped UV pairs.
@compute @workgroup_size(8, 4)
fn warp_uv(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= plane.out_width || gid.y >= plane.out_height {
        return;
    }
    let x0 = gid.x * 8u;
    let base = (gid.y * plane.out_pitch + gid.x * 16u) / 4u;
    for (var i = 0u; i < 4u; i = i + 1u) {
        let a = warp_chroma(x0 + i * 2u, gid.y);
        let b = warp_chroma(x0 + i * 2u + 1u, gid.y);
        dst[base + i] = quantize(a.x) | (quantize(a.y) << 8u)
            | (quantize(b.x) << 16u) | (quantize(b.y) << 24u);
    }
}
"#;

/// Normalized warp: one pixel per invocation, written through the lane at
/// each word boundary since storage writes are word-granular.
const WARP_SHADER_NORMALIZED: &str = r#"
struct WarpConfig {
    frame_id: i32,
    valid: i32,
    width: i32,
    height: i32,
    trim_ratio: f32,
    m0: f32, m1: f32, m2: f32,
    m3: f32, m4: f32, m5: f32,
    m6: f32, m7: f32, m8: f32,
    _pad0: f32,
    _pad1: f32,
}

struct PlaneLayout {
    in_width: u32,
    in_height: u32,
    in_pitch: u32,
    out_width: u32,
    out_height: u32,
    out_pitch: u32,
    _pad0: u32,
    _pad1: u32,
}

override WARP_Y: u32 = 1u;

@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> config: WarpConfig;
@group(0) @binding(3) var<uniform> plane: PlaneLayout;

fn load_byte(idx: u32) -> f32 {
    let word = src[idx / 4u];
    return f32((word >> ((idx % 4u) * 8u)) & 0xffu) / 255.0;
}

fn border_level() -> f32 {
    if WARP_Y == 1u {
        return 0.0;
    }
    return 0.5;
}

fn warp_coord(x: f32, y: f32) -> vec2<f32> {
    let w = config.m6 * x + config.m7 * y + config.m8;
    if abs(w) < 1e-6 {
        return vec2<f32>(-1.0, -1.0);
    }
    return vec2<f32>(
        (config.m0 * x + config.m1 * y + config.m2) / w,
        (config.m3 * x + config.m4 * y + config.m5) / w,
    );
}

fn trimmed(pos: vec2<f32>) -> bool {
    let tx = config.trim_ratio * f32(plane.in_width);
    let ty = config.trim_ratio * f32(plane.in_height);
    return pos.x < tx || pos.y < ty
        || pos.x > f32(plane.in_width) - 1.0 - tx
        || pos.y > f32(plane.in_height) - 1.0 - ty;
}

fn load_luma(x: i32, y: i32) -> f32 {
    if x < 0 || y < 0 || x >= i32(plane.in_width) || y >= i32(plane.in_height) {
        return border_level();
    }
    return load_byte(u32(y) * plane.in_pitch + u32(x));
}

fn sample_luma(pos: vec2<f32>) -> f32 {
    let x0 = i32(floor(pos.x));
    let y0 = i32(floor(pos.y));
    let fx = fract(pos.x);
    let fy = fract(pos.y);
    let top = mix(load_luma(x0, y0), load_luma(x0 + 1, y0), fx);
    let bottom = mix(load_luma(x0, y0 + 1), load_luma(x0 + 1, y0 + 1), fx);
    return mix(top, bottom, fy);
}

fn warp_luma(x: u32, y: u32) -> f32 {
    let pos = warp_coord(f32(x), f32(y));
    if trimmed(pos) {
        return border_level();
    }
    return sample_luma(pos);
}

fn load_chroma(x: i32, y: i32) -> vec2<f32> {
    if x < 0 || y < 0 || x >= i32(plane.in_width) || y >= i32(plane.in_height) {
        return vec2<f32>(border_level(), border_level());
    }
    let idx = u32(y) * plane.in_pitch + u32(x) * 2u;
    return vec2<f32>(load_byte(idx), load_byte(idx + 1u));
}

fn sample_chroma(pos: vec2<f32>) -> vec2<f32> {
    let x0 = i32(floor(pos.x));
    let y0 = i32(floor(pos.y));
    let fx = vec2<f32>(fract(pos.x));
    let fy = vec2<f32>(fract(pos.y));
    let top = mix(load_chroma(x0, y0), load_chroma(x0 + 1, y0), fx);
    let bottom = mix(load_chroma(x0, y0 + 1), load_chroma(x0 + 1, y0 + 1), fx);
    return mix(top, bottom, fy);
}

fn warp_chroma(x: u32, y: u32) -> vec2<f32> {
    let pos = warp_coord(f32(x), f32(y));
    if trimmed(pos) {
        return vec2<f32>(border_level(), border_level());
    }
    return sample_chroma(pos);
}

fn quantize(v: f32) -> u32 {
    return u32(clamp(v, 0.0, 1.0) * 255.0 + 0.5);
}

// The lane at each word boundary resolves all four pixels of its word.
@compute @workgroup_size(8, 4)
fn warp_y(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= plane.out_width || gid.y >= plane.out_height {
        return;
    }
    if gid.x % 4u != 0u {
        return;
    }
    var word = 0u;
    for (var i = 0u; i < 4u; i = i + 1u) {
        let x = gid.x + i;
        if x >= plane.out_width {
            break;
        }
        word = word | (quantize(warp_luma(x, gid.y)) << (i * 8u));
    }
    dst[(gid.y * plane.out_pitch + gid.x) / 4u] = word;
}

// One word holds two UV pairs; the even lane resolves both.
@compute @workgroup_size(8, 4)
fn warp_uv(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= plane.out_width || gid.y >= plane.out_height {
        return;
    }
    if gid.x % 2u != 0u {
        return;
    }
    var word = 0u;
    for (var i = 0u; i < 2u; i = i + 1u) {
        let x = gid.x + i;
        if x >= plane.out_width {
            break;
        }
        let c = warp_chroma(x, gid.y);
        word = word | ((quantize(c.x) | (quantize(c.y) << 8u)) << (i * 16u));
    }
    dst[(gid.y * plane.out_pitch + gid.x * 2u) / 4u] = word;
}
"#;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use crate::warp_config::{WarpUpdate, IDENTITY_PROJ};

    fn kernel(
        channel: WarpChannel,
        mode: OutputMode,
    ) -> (Arc<MockDevice>, ChannelWarpKernel<MockDevice>, Arc<WarpConfigCell>) {
        let device = Arc::new(MockDevice::new());
        let config = Arc::new(WarpConfigCell::new());
        let k = ChannelWarpKernel::new(device.clone(), channel, mode, config.clone()).unwrap();
        (device, k, config)
    }

    fn primed_update(proj_mat: [f32; 9]) -> WarpUpdate {
        WarpUpdate {
            frame_id: 0,
            valid: 1,
            frame_width: 1920,
            frame_height: 1080,
            proj_mat,
        }
    }

    #[test]
    fn test_kernel_name_and_build_flag() {
        let (device, _k, _) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        let built = device.built.lock();
        assert_eq!(built[0].0, "warp_y");
        assert_eq!(built[0].1.get("WARP_Y"), Some(1));

        let (device, _k, _) = kernel(WarpChannel::Chroma, OutputMode::PackedUint);
        let built = device.built.lock();
        assert_eq!(built[0].0, "warp_uv");
        assert_eq!(built[0].1.get("WARP_Y"), Some(0));
    }

    #[test]
    fn test_build_failure_propagates() {
        let device = Arc::new(MockDevice::new());
        device.fail_next_build();
        let config = Arc::new(WarpConfigCell::new());
        let result = ChannelWarpKernel::new(
            device,
            WarpChannel::Luma,
            OutputMode::PackedUint,
            config,
        );
        assert!(matches!(result, Err(WarpError::BuildError(_))));
    }

    #[test]
    fn test_invalid_kernel_propagates() {
        let device = Arc::new(MockDevice::new());
        device.invalidate_next_build();
        let config = Arc::new(WarpConfigCell::new());
        let result = ChannelWarpKernel::new(
            device,
            WarpChannel::Chroma,
            OutputMode::Normalized,
            config,
        );
        assert!(matches!(result, Err(WarpError::InvalidKernel(_))));
    }

    #[test]
    fn test_input_descriptors() {
        let surface = VideoSurface::nv12(1920, 1080);

        let desc = input_image_desc(WarpChannel::Luma, &surface);
        assert_eq!(desc.format.order, ChannelOrder::R);
        assert_eq!(desc.format.data_type, ChannelDataType::Unorm8);
        assert_eq!((desc.width, desc.height), (1920, 1080));
        assert_eq!(desc.row_pitch, surface.strides[0]);

        let desc = input_image_desc(WarpChannel::Chroma, &surface);
        assert_eq!(desc.format.order, ChannelOrder::Rg);
        assert_eq!((desc.width, desc.height), (960, 540));
        assert_eq!(desc.row_pitch, surface.strides[1]);
    }

    #[test]
    fn test_output_descriptor_packed() {
        let surface = VideoSurface::nv12(1920, 1080);

        let desc = output_image_desc(OutputMode::PackedUint, WarpChannel::Luma, &surface);
        assert_eq!(desc.format.order, ChannelOrder::Rgba);
        assert_eq!(desc.format.data_type, ChannelDataType::Uint16);
        // floor(1920 / 4) * 4 / 8
        assert_eq!((desc.width, desc.height), (240, 1080));

        let desc = output_image_desc(OutputMode::PackedUint, WarpChannel::Chroma, &surface);
        assert_eq!(desc.format.data_type, ChannelDataType::Uint32);
        assert_eq!((desc.width, desc.height), (120, 540));
    }

    #[test]
    fn test_output_descriptor_normalized() {
        let surface = VideoSurface::nv12(1920, 1080);

        let desc = output_image_desc(OutputMode::Normalized, WarpChannel::Luma, &surface);
        assert_eq!(desc.format, WarpChannel::Luma.input_format());
        assert_eq!((desc.width, desc.height), (1920, 1080));

        let desc = output_image_desc(OutputMode::Normalized, WarpChannel::Chroma, &surface);
        assert_eq!(desc.format, WarpChannel::Chroma.input_format());
        assert_eq!((desc.width, desc.height), (960, 540));
    }

    #[test]
    fn test_work_size_rounds_up_to_workgroups() {
        let (_device, k, _) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        let surface = VideoSurface::nv12(1930, 1082);
        let (_args, work) = k.prepare_arguments(&surface, &surface).unwrap();
        assert_eq!(work.local, [WARP_WG_WIDTH, WARP_WG_HEIGHT]);
        // Packed width: floor(1930 / 4) * 4 / 8 = 241, rounded up to 248.
        assert_eq!(work.global, [248, 1084]);
    }

    #[test]
    fn test_luma_keeps_matrix_unchanged() {
        let (_device, k, config) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        let proj = [1.0, 0.0, 4.0, 0.0, 1.0, 6.0, 8.0, 10.0, 1.0];
        config.set(primed_update(proj));

        let surface = VideoSurface::nv12(1920, 1080);
        let (args, _work) = k.prepare_arguments(&surface, &surface).unwrap();
        assert_eq!(args.config.proj_mat, proj);
    }

    #[test]
    fn test_chroma_adapts_snapshot_only() {
        let (_device, k, config) = kernel(WarpChannel::Chroma, OutputMode::PackedUint);
        let proj = [1.0, 0.0, 4.0, 0.0, 1.0, 6.0, 8.0, 10.0, 1.0];
        config.set(primed_update(proj));

        let surface = VideoSurface::nv12(1920, 1080);
        let (args, _work) = k.prepare_arguments(&surface, &surface).unwrap();
        assert_eq!(
            args.config.proj_mat,
            [1.0, 0.0, 2.0, 0.0, 1.0, 3.0, 16.0, 20.0, 1.0]
        );
        // The handler's stored config is untouched.
        assert_eq!(config.get().proj_mat, proj);
    }

    #[test]
    fn test_chroma_adaptation_of_identity_is_noop() {
        let (_device, k, config) = kernel(WarpChannel::Chroma, OutputMode::Normalized);
        config.set(primed_update(IDENTITY_PROJ));

        let surface = VideoSurface::nv12(1920, 1080);
        let (args, _work) = k.prepare_arguments(&surface, &surface).unwrap();
        assert_eq!(args.config.proj_mat, IDENTITY_PROJ);
    }

    #[test]
    fn test_out_of_range_trim_is_clamped_in_arguments() {
        let (_device, k, config) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        config.set(primed_update(IDENTITY_PROJ));
        config.set_trim_ratio(0.7);

        let surface = VideoSurface::nv12(1920, 1080);
        let (args, _work) = k.prepare_arguments(&surface, &surface).unwrap();
        assert_eq!(args.config.trim_ratio, 0.0);
        // The stored config keeps the caller's value.
        assert_eq!(config.get().trim_ratio, 0.7);
    }

    #[test]
    fn test_input_wrap_failure_leaves_ring_untouched() {
        let (device, k, _) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        device.fail_next_wrap();

        let surface = VideoSurface::nv12(1920, 1080);
        let result = k.prepare_arguments(&surface, &surface);
        assert!(matches!(result, Err(WarpError::MemoryUnavailable(_))));
        assert_eq!(k.in_flight_inputs(), 0);
        assert_eq!(k.input_frames(), -1);

        // The next frame goes through normally.
        assert!(k.prepare_arguments(&surface, &surface).is_ok());
        assert_eq!(k.in_flight_inputs(), 1);
    }

    #[test]
    fn test_output_wrap_failure_leaves_ring_untouched() {
        let (device, k, _) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        device.pass_next_wrap();
        device.fail_next_wrap();

        let surface = VideoSurface::nv12(1920, 1080);
        let result = k.prepare_arguments(&surface, &surface);
        assert!(matches!(result, Err(WarpError::MemoryUnavailable(_))));
        assert_eq!(k.in_flight_inputs(), 0);
    }

    #[test]
    fn test_kernel_input_is_ring_front() {
        let (_device, k, _) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        let surface = VideoSurface::nv12(1920, 1080);

        let (first, _) = k.prepare_arguments(&surface, &surface).unwrap();
        let (second, _) = k.prepare_arguments(&surface, &surface).unwrap();
        // Wrap ids alternate input/output, so frame inputs are 0 and 2; the
        // second dispatch still binds the oldest in-flight input.
        assert_eq!(first.input.id, 0);
        assert_eq!(second.input.id, 0);
        assert_eq!(k.in_flight_inputs(), 2);
    }

    #[test]
    fn test_post_execute_releases_fifo() {
        let (_device, k, config) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        config.set(primed_update(IDENTITY_PROJ));
        let surface = VideoSurface::nv12(1920, 1080);

        let mut snapshots = Vec::new();
        for _ in 0..3 {
            let (args, _) = k.prepare_arguments(&surface, &surface).unwrap();
            snapshots.push(args.config);
        }
        assert_eq!(k.in_flight_inputs(), 3);

        // Inputs were wrap ids 0, 2, 4; completions release them in order.
        for (i, snapshot) in snapshots.iter().enumerate() {
            let front = k.ring.front().unwrap();
            assert_eq!(front.id, 2 * i as u64);
            k.post_execute(snapshot);
        }
        assert_eq!(k.in_flight_inputs(), 0);
        assert_eq!(k.warped_frames(), 2);
    }

    #[test]
    fn test_post_execute_without_primed_config_keeps_ring() {
        let (_device, k, _) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        let surface = VideoSurface::nv12(1920, 1080);

        // No config was ever set, so the snapshot carries valid = -1.
        let (args, _) = k.prepare_arguments(&surface, &surface).unwrap();
        assert_eq!(args.config.valid, -1);

        k.post_execute(&args.config);
        assert_eq!(k.in_flight_inputs(), 1);
        assert_eq!(k.warped_frames(), -1);
    }

    #[test]
    fn test_wait_idle_returns_once_invocations_finish() {
        let (_device, k, _) = kernel(WarpChannel::Luma, OutputMode::PackedUint);
        let surface = VideoSurface::nv12(1920, 1080);

        let (args, _) = k.prepare_arguments(&surface, &surface).unwrap();
        k.invocation_enqueued();
        k.post_execute(&args.config);
        k.wait_idle();
    }
}
