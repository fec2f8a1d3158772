//! Host-side NV12 video surfaces.
//!
//! A [`VideoSurface`] describes one frame the way the warp stage consumes it:
//! dimensions plus per-plane byte strides and byte offsets into a single
//! backing allocation. Plane 0 is luma (Y), plane 1 is interleaved chroma
//! (UV) at half resolution in both axes.

use std::sync::Arc;

use crate::device::align_up;

/// Number of planes tracked per surface (Y + interleaved UV).
pub const SURFACE_PLANES: usize = 2;

/// Row stride alignment used by [`VideoSurface::nv12`].
const STRIDE_ALIGN: u32 = 64;

/// One NV12 frame: dimensions, per-plane layout, and the backing bytes.
#[derive(Debug, Clone)]
pub struct VideoSurface {
    /// Luma plane width in pixels.
    pub width: u32,
    /// Luma plane height in pixels.
    pub height: u32,
    /// Bytes per row, per plane.
    pub strides: [u32; SURFACE_PLANES],
    /// Byte offset of each plane inside `data`.
    pub offsets: [u32; SURFACE_PLANES],
    /// Backing allocation; shared so surface clones stay cheap while
    /// in-flight GPU wraps hold on to the frame.
    pub data: Arc<Vec<u8>>,
}

impl VideoSurface {
    /// Allocate a zeroed NV12 surface with aligned row strides.
    pub fn nv12(width: u32, height: u32) -> Self {
        let stride = align_up(width, STRIDE_ALIGN);
        let y_size = stride * height;
        let uv_size = stride * (height / 2);
        Self {
            width,
            height,
            strides: [stride, stride],
            offsets: [0, y_size],
            data: Arc::new(vec![0u8; (y_size + uv_size) as usize]),
        }
    }

    /// Wrap an existing allocation with an explicit plane layout.
    pub fn from_parts(
        width: u32,
        height: u32,
        strides: [u32; SURFACE_PLANES],
        offsets: [u32; SURFACE_PLANES],
        data: Arc<Vec<u8>>,
    ) -> Self {
        Self {
            width,
            height,
            strides,
            offsets,
            data,
        }
    }

    /// Total size of the backing allocation in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_layout() {
        let surface = VideoSurface::nv12(1920, 1080);
        assert_eq!(surface.strides, [1920, 1920]);
        assert_eq!(surface.offsets, [0, 1920 * 1080]);
        assert_eq!(surface.len(), 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_nv12_stride_alignment() {
        let surface = VideoSurface::nv12(1278, 720);
        assert_eq!(surface.strides[0], 1280);
        assert_eq!(surface.offsets[1], 1280 * 720);
        assert_eq!(surface.len(), (1280 * 720 + 1280 * 360) as usize);
    }
}
