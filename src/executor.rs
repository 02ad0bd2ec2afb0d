//! C8: Filter Executor — runs a filter's passes against the texture
//! table, handling aliasing, MSAA resolve, and readback hazards (§4.8).
//!
//! Grounded in `program.rs::Encoder::render_simple_pipeline`'s
//! single-triangle render-pass recording and `tests/blend.rs`'s
//! render-pass-then-submit shape, generalized to a pass list with
//! scratch-texture aliasing and a compute dispatch path the teacher does
//! not have (supplemented from `other_examples/.../executable_pipeline.rs`'s
//! compute-pass dispatch-size rounding).
use std::collections::HashMap;

use crate::buffer_manager::FilterBuffer;
use crate::cache::PipelineHandle;
use crate::command_queue::CommandQueue;
use crate::error::EngineError;
use crate::filter::{Filter, Pass, TextureName, MSAA_TEXTURE, SCRATCH_TEXTURE};

const COMPUTE_WORKGROUP: u32 = 16;

/// Resolves texture names to live views/textures for the duration of one
/// filter's execution. The engine owns the actual texture table (C1); this
/// is a read-only view into it plus the two reserved scratch slots.
pub struct TextureTable<'a> {
    pub named: &'a HashMap<TextureName, (wgpu::Texture, wgpu::TextureView)>,
    pub scratch: &'a (wgpu::Texture, wgpu::TextureView),
    pub msaa: &'a (wgpu::Texture, wgpu::TextureView),
    pub surface: Option<&'a wgpu::TextureView>,
    /// Static full-screen-triangle geometry shared by every render pass:
    /// one buffer of positions, one of tex-coords (§4.5/§4.8 "two vertex
    /// buffers").
    pub geometry: &'a FullscreenGeometry,
}

/// Positions covering the viewport via an over-sized triangle
/// (`(-1,-1), (3,-1), (-1,3)`), and matching tex-coords, so a single
/// `draw(0..3, 0..1)` rasterises the full screen with no vertex index
/// buffer required.
pub struct FullscreenGeometry {
    pub positions: wgpu::Buffer,
    pub tex_coords: wgpu::Buffer,
}

impl FullscreenGeometry {
    pub fn new(device: &wgpu::Device) -> Self {
        use wgpu::util::DeviceExt;
        let positions: [[f32; 2]; 3] = [[-1.0, -1.0], [3.0, -1.0], [-1.0, 3.0]];
        let tex_coords: [[f32; 2]; 3] = [[0.0, 1.0], [2.0, 1.0], [0.0, -1.0]];
        FullscreenGeometry {
            positions: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("fullscreen-triangle-positions"),
                contents: bytemuck::cast_slice(&positions),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            tex_coords: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("fullscreen-triangle-texcoords"),
                contents: bytemuck::cast_slice(&tex_coords),
                usage: wgpu::BufferUsages::VERTEX,
            }),
        }
    }
}

impl<'a> TextureTable<'a> {
    /// Resolve each named input to its live view, in order, for bind-group
    /// construction (§4.4 "bindings 1..N: one per `inputs[i]`").
    pub fn resolve_input_views(&self, names: &[TextureName]) -> Result<Vec<&'a wgpu::TextureView>, EngineError> {
        names.iter().map(|name| self.view(name)).collect()
    }

    fn view(&self, name: &TextureName) -> Result<&'a wgpu::TextureView, EngineError> {
        if name.as_str() == SCRATCH_TEXTURE {
            return Ok(&self.scratch.1);
        }
        if name.as_str() == MSAA_TEXTURE {
            return Ok(&self.msaa.1);
        }
        self.named
            .get(name)
            .map(|(_, view)| view)
            .ok_or_else(|| {
                EngineError::Texture(crate::error::TextureError {
                    name: name.0.clone(),
                    available: self.named.keys().map(|n| n.0.clone()).collect(),
                })
            })
    }

    fn texture(&self, name: &TextureName) -> Result<&'a wgpu::Texture, EngineError> {
        if name.as_str() == SCRATCH_TEXTURE {
            return Ok(&self.scratch.0);
        }
        self.named
            .get(name)
            .map(|(texture, _)| texture)
            .ok_or_else(|| {
                EngineError::Texture(crate::error::TextureError {
                    name: name.0.clone(),
                    available: self.named.keys().map(|n| n.0.clone()).collect(),
                })
            })
    }

    fn output_view(&self, output: &Option<TextureName>) -> Result<&'a wgpu::TextureView, EngineError> {
        match output {
            Some(name) => self.view(name),
            None => self.surface.ok_or(EngineError::Internal("terminal pass with no surface bound".into())),
        }
    }
}

pub fn dispatch_size(width: u32, height: u32) -> (u32, u32, u32) {
    let x = (width + COMPUTE_WORKGROUP - 1) / COMPUTE_WORKGROUP;
    let y = (height + COMPUTE_WORKGROUP - 1) / COMPUTE_WORKGROUP;
    (x.max(1), y.max(1), 1)
}

/// Runs every active pass of `filter` in order, returning once a terminal
/// pass has flushed and the GPU queue has been awaited (§4.8 "terminal
/// pass: flush + await + break").
pub struct FilterExecutor;

impl FilterExecutor {
    pub fn run(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        command_queue: &mut CommandQueue,
        filter: &mut Filter,
        textures: &TextureTable,
        filter_buffer: Option<&FilterBuffer>,
        dims: (u32, u32),
    ) -> Result<(), EngineError> {
        let is_compute = filter.is_compute();
        for pass in filter.passes_mut() {
            if !Self::guard(pass) {
                continue;
            }

            if is_compute {
                Self::run_compute_pass(device, queue, command_queue, pass, filter_buffer, dims)?;
            } else {
                Self::run_render_pass(device, queue, command_queue, pass, textures)?;
            }

            if pass.is_terminal() {
                command_queue.flush_and_wait(device, queue)?;
                break;
            }
        }
        Ok(())
    }

    /// Per-pass guard: only runs if active, has a built pipeline, and a
    /// group-0 bind group (§4.8 "Per-pass guard").
    fn guard(pass: &Pass) -> bool {
        pass.active && pass.pipeline.is_some() && pass.bind_groups.first().map(Option::is_some).unwrap_or(false)
    }

    /// §4.8 step 2: clear the canonical output storage buffer to zeros via
    /// a transient staging buffer, then dispatch
    /// `ceil(width/16) x ceil(height/16) x 1` workgroups of size 16x16.
    fn run_compute_pass(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        command_queue: &mut CommandQueue,
        pass: &Pass,
        filter_buffer: Option<&FilterBuffer>,
        dims: (u32, u32),
    ) -> Result<(), EngineError> {
        let pipeline = match pass.pipeline.as_ref() {
            Some(PipelineHandle::Compute(pipeline)) => pipeline.clone(),
            _ => return Err(EngineError::Pipeline(format!("pass `{}` has no compute pipeline", pass.label))),
        };
        let bind_group = pass.bind_groups[0].as_ref().expect("guarded above");
        let (x, y, z) = dispatch_size(dims.0, dims.1);

        if let Some(output_buffer) = filter_buffer.and_then(FilterBuffer::canonical_storage_buffer) {
            let size = output_buffer.size();
            let zeros = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("compute-output-zero-staging"),
                size,
                usage: wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            });
            zeros.slice(..).get_mapped_range_mut().fill(0);
            zeros.unmap();
            command_queue.add_buffer_copy(device, queue, &zeros, 0, output_buffer, 0, size);
        }

        command_queue.add_compute_pass(device, queue, |encoder| {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(pass.label.as_str()),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&pipeline);
            compute_pass.set_bind_group(0, bind_group, &[]);
            compute_pass.dispatch_workgroups(x, y, z);
        });
        Ok(())
    }

    /// Render pass with scratch-texture aliasing (§4.8 "render-with-
    /// scratch-on-aliasing"): if `pass.output` also appears in
    /// `pass.inputs`, render into `textureTemp` instead and copy the
    /// result back to the real output afterward, avoiding a
    /// read-after-write hazard on the same texture.
    fn run_render_pass(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        command_queue: &mut CommandQueue,
        pass: &Pass,
        textures: &TextureTable,
    ) -> Result<(), EngineError> {
        let pipeline = match pass.pipeline.as_ref() {
            Some(PipelineHandle::Render(pipeline)) => pipeline.clone(),
            _ => return Err(EngineError::Pipeline(format!("pass `{}` has no render pipeline", pass.label))),
        };
        let bind_group = pass.bind_groups[0].as_ref().expect("guarded above");

        let aliasing = pass.aliases_output();
        let real_output_view = textures.output_view(&pass.output)?;
        let render_target = if aliasing {
            &textures.scratch.1
        } else {
            real_output_view
        };

        command_queue.add_render_pass(device, queue, |encoder| {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(pass.label.as_str()),
                // 4x MSAA (§4.8): colour attachment is the multisampled
                // `textureMASS`, resolving into the real render target.
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &textures.msaa.1,
                    resolve_target: Some(render_target),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            // Full-screen triangle: 3 vertices, two vertex buffers bound
            // to the same fixed-format quad geometry (§4.5/§4.8).
            render_pass.set_vertex_buffer(0, textures.geometry.positions.slice(..));
            render_pass.set_vertex_buffer(1, textures.geometry.tex_coords.slice(..));
            render_pass.draw(0..3, 0..1);
        });

        if aliasing {
            if let Some(output_name) = &pass.output {
                let output_texture = textures.texture(output_name)?;
                let size = output_texture.size();
                command_queue.add_texture_copy(
                    device,
                    queue,
                    wgpu::ImageCopyTexture {
                        texture: &textures.scratch.0,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::ImageCopyTexture {
                        texture: output_texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    size,
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_size_rounds_up_to_workgroup_multiple() {
        assert_eq!(dispatch_size(32, 32), (2, 2, 1));
        assert_eq!(dispatch_size(33, 16), (3, 1, 1));
        assert_eq!(dispatch_size(1, 1), (1, 1, 1));
    }

    #[test]
    fn guard_rejects_inactive_pass() {
        let mut pass = Pass::new("p", vec![], None, "shader");
        pass.active = false;
        assert!(!FilterExecutor::guard(&pass));
    }

    #[test]
    fn guard_rejects_pass_without_pipeline() {
        let pass = Pass::new("p", vec![], None, "shader");
        assert!(!FilterExecutor::guard(&pass));
    }
}
