//! wgpu-backed warp device.
//!
//! Implements [`WarpDevice`] on top of wgpu compute pipelines. Plane wraps
//! are storage-buffer uploads honoring the descriptor's row pitch; kernels
//! are WGSL compute pipelines specialized through pipeline constants; the
//! completion contract maps to `Queue::on_submitted_work_done` plus an
//! explicit poll pump.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::device::{
    Completion, ImageDesc, KernelArgs, KernelBuildOptions, WarpDevice, WarpError, WorkSize,
};
use crate::surface::VideoSurface;
use crate::warp_config::WarpConfig;

/// Device image: one plane uploaded into a storage buffer, plus the
/// descriptor it was wrapped with.
#[derive(Clone)]
pub struct WgpuImage {
    buffer: Arc<wgpu::Buffer>,
    desc: ImageDesc,
}

impl WgpuImage {
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }
}

/// A built compute pipeline plus the layout its per-frame bind groups use.
pub struct WgpuKernel {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    name: String,
}

impl WgpuKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Geometry of one dispatch, mirrored into the shader's `PlaneLayout` block.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
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

impl PlaneLayout {
    fn from_descs(input: &ImageDesc, output: &ImageDesc) -> Self {
        Self {
            in_width: input.width,
            in_height: input.height,
            in_pitch: input.row_pitch,
            out_width: output.width,
            out_height: output.height,
            out_pitch: output.row_pitch,
            _pad0: 0,
            _pad1: 0,
        }
    }
}

/// The WGSL config block is padded to a 16-byte multiple; the first 56
/// bytes are the kernel's declared argument layout.
fn config_uniform_bytes(config: &WarpConfig) -> [u8; 64] {
    let mut bytes = [0u8; 64];
    bytes[..std::mem::size_of::<WarpConfig>()].copy_from_slice(bytemuck::bytes_of(config));
    bytes
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuDevice {
    pub async fn new() -> Result<Self, WarpError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(WarpError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("stabwarp_device"),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| WarpError::DeviceRequest(e.to_string()))?;

        tracing::info!("warp device: {}", adapter.get_info().name);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    pub fn new_blocking() -> Result<Self, WarpError> {
        pollster::block_on(Self::new())
    }

    /// Pump the device so completion callbacks registered by `enqueue` fire.
    /// `wait` blocks until all submitted work is done.
    pub fn poll(&self, wait: bool) {
        let maintain = if wait {
            wgpu::Maintain::Wait
        } else {
            wgpu::Maintain::Poll
        };
        let _ = self.device.poll(maintain);
    }

    /// Copy an image's plane bytes back to the host.
    pub fn read_back(&self, image: &WgpuImage) -> Result<Vec<u8>, WarpError> {
        let size = image.buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("warp_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_buffer_to_buffer(&image.buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| WarpError::DeviceRequest(e.to_string()))?
            .map_err(|e| WarpError::DeviceRequest(e.to_string()))?;

        let data = slice.get_mapped_range();
        let result = data.to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }
}

impl WarpDevice for WgpuDevice {
    type Image = WgpuImage;
    type Kernel = WgpuKernel;

    fn wrap_image(
        &self,
        surface: &VideoSurface,
        desc: &ImageDesc,
        offset: u32,
    ) -> Result<WgpuImage, WarpError> {
        let needed = offset as usize + desc.row_pitch as usize * desc.height as usize;
        if needed > surface.len() {
            return Err(WarpError::MemoryUnavailable(format!(
                "plane at offset {offset} needs {needed} bytes, surface holds {}",
                surface.len()
            )));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(WarpError::MemoryUnavailable(format!(
                "degenerate image {}x{}",
                desc.width, desc.height
            )));
        }

        // Wraps are upload copies; zero-copy surface sharing is outside
        // wgpu's reach.
        let contents = &surface.data[offset as usize..needed];
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("warp_plane"),
                contents,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            });

        Ok(WgpuImage {
            buffer: Arc::new(buffer),
            desc: desc.clone(),
        })
    }

    fn build_kernel(
        &self,
        source: &str,
        name: &str,
        options: &KernelBuildOptions,
    ) -> Result<WgpuKernel, WarpError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(WarpError::BuildError(err.to_string()));
        }

        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(name),
                    entries: &[
                        // Input plane
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: true },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        // Output plane
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: false },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        // Warp config
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        // Plane layout
                        wgpu::BindGroupLayoutEntry {
                            binding: 3,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(name),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let constants: HashMap<String, f64> = options
            .defines
            .iter()
            .map(|(key, value)| (key.clone(), *value as f64))
            .collect();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(name),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    ..Default::default()
                },
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(WarpError::InvalidKernel(err.to_string()));
        }

        tracing::debug!("built compute pipeline {name}");
        Ok(WgpuKernel {
            pipeline,
            bind_group_layout,
            name: name.to_string(),
        })
    }

    fn enqueue(
        &self,
        kernel: &WgpuKernel,
        args: &KernelArgs<WgpuImage>,
        work: &WorkSize,
        on_complete: Completion,
    ) -> Result<(), WarpError> {
        let plane = PlaneLayout::from_descs(&args.input.desc, &args.output.desc);
        let plane_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("warp_plane_layout"),
                contents: bytemuck::bytes_of(&plane),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let config_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("warp_config"),
                contents: &config_uniform_bytes(&args.config),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name.as_str()),
            layout: &kernel.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: args.input.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: args.output.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: config_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: plane_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.name.as_str()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name.as_str()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                work.global[0] / work.local[0],
                work.global[1] / work.local[1],
                1,
            );
        }
        self.queue.submit(Some(encoder.finish()));
        self.queue.on_submitted_work_done(on_complete);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChannelDataType, ChannelOrder, ImageFormat};

    #[test]
    fn test_config_uniform_padding() {
        let config = WarpConfig {
            frame_id: 3,
            valid: 1,
            width: 1920,
            height: 1080,
            trim_ratio: 0.05,
            proj_mat: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        };
        let bytes = config_uniform_bytes(&config);
        assert_eq!(&bytes[..56], bytemuck::bytes_of(&config));
        assert_eq!(&bytes[56..], &[0u8; 8]);
    }

    #[test]
    fn test_plane_layout_mirrors_descs() {
        assert_eq!(std::mem::size_of::<PlaneLayout>(), 32);

        let input = ImageDesc {
            format: ImageFormat {
                order: ChannelOrder::R,
                data_type: ChannelDataType::Unorm8,
            },
            width: 1920,
            height: 1080,
            row_pitch: 1920,
        };
        let output = ImageDesc {
            format: ImageFormat {
                order: ChannelOrder::Rgba,
                data_type: ChannelDataType::Uint16,
            },
            width: 240,
            height: 1080,
            row_pitch: 1920,
        };
        let plane = PlaneLayout::from_descs(&input, &output);
        assert_eq!(plane.in_width, 1920);
        assert_eq!(plane.in_pitch, 1920);
        assert_eq!(plane.out_width, 240);
        assert_eq!(plane.out_height, 1080);
    }
}
