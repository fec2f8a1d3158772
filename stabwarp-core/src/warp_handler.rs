//! Frame-level warp handler.
//!
//! [`WarpHandler`] is the single point external code updates with a new
//! transform per frame. It owns the live [`WarpConfig`] cell and the two
//! channel kernels (luma, chroma), dispatches both per frame and wires the
//! device completion back into each kernel's ring reclamation.

use std::sync::Arc;

use crate::device::{WarpDevice, WarpError};
use crate::surface::VideoSurface;
use crate::warp_config::{WarpConfig, WarpConfigCell, WarpUpdate};
use crate::warp_kernel::{ChannelWarpKernel, OutputMode, WarpChannel};

/// Per-channel counters, for pipeline introspection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelStats {
    pub channel: WarpChannel,
    /// Frames whose input plane has been wrapped and ring-tracked.
    pub input_frames: i64,
    /// Frames completed by the device with a primed config.
    pub warped_frames: i64,
    /// Inputs still held alive in the channel's ring.
    pub in_flight_inputs: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WarpStats {
    pub luma: ChannelStats,
    pub chroma: ChannelStats,
}

/// Owns the authoritative warp config and both channel kernels.
pub struct WarpHandler<D: WarpDevice> {
    device: Arc<D>,
    config: Arc<WarpConfigCell>,
    luma: Arc<ChannelWarpKernel<D>>,
    chroma: Arc<ChannelWarpKernel<D>>,
}

impl<D: WarpDevice> WarpHandler<D> {
    /// Build a handler with both channel kernels attached. Any kernel build
    /// failure aborts construction; a partially-initialized handler never
    /// escapes.
    pub fn new(device: Arc<D>, mode: OutputMode) -> Result<Self, WarpError> {
        let config = Arc::new(WarpConfigCell::new());
        let luma = Arc::new(ChannelWarpKernel::new(
            device.clone(),
            WarpChannel::Luma,
            mode,
            config.clone(),
        )?);
        let chroma = Arc::new(ChannelWarpKernel::new(
            device.clone(),
            WarpChannel::Chroma,
            mode,
            config.clone(),
        )?);
        tracing::info!("warp handler ready ({mode:?} output)");
        Ok(Self {
            device,
            config,
            luma,
            chroma,
        })
    }

    /// Take over the per-frame transform from a motion result. A pure data
    /// copy; always succeeds.
    pub fn set_warp_config(&self, update: WarpUpdate) -> bool {
        self.config.set(update)
    }

    /// Snapshot of the live config, by value.
    pub fn get_warp_config(&self) -> WarpConfig {
        self.config.get()
    }

    /// Adjust the border trim fraction fed to the kernels.
    pub fn set_trim_ratio(&self, ratio: f32) {
        self.config.set_trim_ratio(ratio);
    }

    /// Restore the identity (no-warp) projection.
    pub fn reset_projection_matrix(&self) {
        self.config.reset_projection_matrix();
    }

    /// Prepare and enqueue both channel kernels for one frame.
    ///
    /// A `MemoryUnavailable` from either channel skips the frame without
    /// touching the rings; construction-time errors cannot occur here.
    pub fn warp_frame(
        &self,
        input: &VideoSurface,
        output: &VideoSurface,
    ) -> Result<(), WarpError> {
        self.dispatch_channel(&self.luma, input, output)?;
        self.dispatch_channel(&self.chroma, input, output)?;
        Ok(())
    }

    fn dispatch_channel(
        &self,
        kernel: &Arc<ChannelWarpKernel<D>>,
        input: &VideoSurface,
        output: &VideoSurface,
    ) -> Result<(), WarpError> {
        let (args, work) = kernel.prepare_arguments(input, output)?;
        kernel.invocation_enqueued();

        // Completion may run on any thread; the kernel reclaims against the
        // exact snapshot that was bound to this invocation.
        let completed = kernel.clone();
        let snapshot = args.config;
        let result = self.device.enqueue(
            kernel.kernel(),
            &args,
            &work,
            Box::new(move || completed.post_execute(&snapshot)),
        );
        if let Err(err) = result {
            kernel.finish_invocation();
            return Err(err);
        }
        Ok(())
    }

    /// Block until every enqueued invocation on both channels completed.
    pub fn wait_idle(&self) {
        self.luma.wait_idle();
        self.chroma.wait_idle();
    }

    pub fn stats(&self) -> WarpStats {
        WarpStats {
            luma: channel_stats(&self.luma),
            chroma: channel_stats(&self.chroma),
        }
    }
}

fn channel_stats<D: WarpDevice>(kernel: &ChannelWarpKernel<D>) -> ChannelStats {
    ChannelStats {
        channel: kernel.channel(),
        input_frames: kernel.input_frames(),
        warped_frames: kernel.warped_frames(),
        in_flight_inputs: kernel.in_flight_inputs(),
    }
}

/// Construction entry point: a ready-to-use handler with both channel
/// kernels built and attached to `device`.
pub fn create_warp_handler<D: WarpDevice>(
    device: Arc<D>,
    mode: OutputMode,
) -> Result<WarpHandler<D>, WarpError> {
    WarpHandler::new(device, mode)
}
