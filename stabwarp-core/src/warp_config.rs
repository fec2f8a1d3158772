//! Warp transform configuration.
//!
//! [`WarpConfig`] is the per-frame projective transform plus its metadata,
//! laid out exactly as the compute kernel reads it. [`WarpConfigCell`] is
//! the single home of the live config: one external writer, one reader per
//! channel kernel, whole-structure snapshot semantics.

use parking_lot::RwLock;

/// Row-major 3x3 identity projection (no warp).
pub const IDENTITY_PROJ: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Per-frame warp parameters, in the kernel's declared field order and size.
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    bytemuck::Pod,
    bytemuck::Zeroable,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct WarpConfig {
    /// Frame the transform was computed for; -1 = unset.
    pub frame_id: i32,
    /// Usable for output-side bookkeeping when > 0.
    pub valid: i32,
    pub width: i32,
    pub height: i32,
    /// Border fraction excluded from warp confidence, sane range [0.0, 0.5].
    pub trim_ratio: f32,
    /// Row-major 3x3 homogeneous projective transform.
    pub proj_mat: [f32; 9],
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            frame_id: -1,
            valid: -1,
            width: 0,
            height: 0,
            trim_ratio: 0.05,
            proj_mat: IDENTITY_PROJ,
        }
    }
}

impl WarpConfig {
    pub fn reset_projection_matrix(&mut self) {
        self.proj_mat = IDENTITY_PROJ;
    }

    /// Force an out-of-range trim ratio to 0.0. The producer is not trusted
    /// to keep it inside [0.0, 0.5].
    pub fn clamp_trim_ratio(&mut self) {
        if !(0.0..=0.5).contains(&self.trim_ratio) {
            self.trim_ratio = 0.0;
        }
    }

    /// Re-derive the projection for the half-resolution UV plane of a 4:2:0
    /// frame:
    ///
    /// ```text
    /// H(uv) = [0.5, 0, 0; 0, 0.5, 0; 0, 0, 1] * H(y) * [2, 0, 0; 0, 2, 0; 0, 0, 1]
    /// ```
    ///
    /// Only the translation terms (2, 5) and the perspective terms (6, 7)
    /// change; the rest of the matrix cancels out.
    pub fn adapt_for_chroma(&mut self) {
        self.proj_mat[2] *= 0.5;
        self.proj_mat[5] *= 0.5;
        self.proj_mat[6] *= 2.0;
        self.proj_mat[7] *= 2.0;
    }
}

/// Per-frame output of the motion-estimation stage: the transform plus the
/// frame it was computed for. Carries no trim ratio; that knob belongs to
/// the warp stage itself.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WarpUpdate {
    pub frame_id: i32,
    pub valid: i32,
    pub frame_width: i32,
    pub frame_height: i32,
    pub proj_mat: [f32; 9],
}

/// Single-writer/multi-reader home of the live [`WarpConfig`].
///
/// Writers replace the tracked fields under the lock and readers copy the
/// whole structure out, so a snapshot is always a fully formed prior-or-new
/// value, never a half-updated one.
pub struct WarpConfigCell {
    inner: RwLock<WarpConfig>,
}

impl WarpConfigCell {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(WarpConfig::default()),
        }
    }

    /// Take over the transform and frame metadata from a motion result.
    /// Leaves the trim ratio untouched. A pure data copy; always succeeds.
    pub fn set(&self, update: WarpUpdate) -> bool {
        tracing::debug!(
            "set warp config[{}] valid={} {}x{} proj_mat={:?}",
            update.frame_id,
            update.valid,
            update.frame_width,
            update.frame_height,
            update.proj_mat
        );
        let mut config = self.inner.write();
        config.frame_id = update.frame_id;
        config.valid = update.valid;
        config.width = update.frame_width;
        config.height = update.frame_height;
        config.proj_mat = update.proj_mat;
        true
    }

    /// Current snapshot, by value.
    pub fn get(&self) -> WarpConfig {
        *self.inner.read()
    }

    /// Adjust the border trim fraction. Out-of-range values are handled by
    /// the consumer-side clamp, not here.
    pub fn set_trim_ratio(&self, ratio: f32) {
        self.inner.write().trim_ratio = ratio;
    }

    pub fn reset_projection_matrix(&self) {
        self.inner.write().reset_projection_matrix();
    }
}

impl Default for WarpConfigCell {
    fn default() -> Self {
        Self::new()
    }
}
