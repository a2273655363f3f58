//! Hardware-accelerated implementation of the contrast pipeline on wgpu
//! compute shaders.
//!
//! All stages of one frame are recorded into a single command submission; the
//! one suspension point per call is the mapped readback of the adjusted frame
//! and the counter. GPU buffers are sized for the current frame shape and
//! rebuilt only when it changes, so a steady stream of frames allocates
//! nothing per call.

use relume_field::coverage::{self, Polarity};
use relume_field::esdt::{Offset2, OffsetField};
use relume_field::ContrastConfig;

use crate::backend::{BackendKind, PipelineBackend, WorkBuffers};
use crate::error::{RelumeError, RelumeResult};

const LABEL: &str = "accelerated-wgpu";
const SHADER: &str = include_str!("contrast.wgsl");

// Must match the Params struct in contrast.wgsl.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    width: u32,
    height: u32,
    polarity: u32,
    _pad0: u32,
    max_distance: f32,
    target_contrast: f32,
    sample_distance: f32,
    _pad1: f32,
}

struct Pipelines {
    prepare: wgpu::ComputePipeline,
    seed: wgpu::ComputePipeline,
    sweep_x: wgpu::ComputePipeline,
    sweep_y: wgpu::ComputePipeline,
    shade: wgpu::ComputePipeline,
}

/// Frame-shaped GPU resources, rebuilt when dimensions change.
struct FrameBuffers {
    width: u32,
    height: u32,
    input: wgpu::Buffer,
    coverage: wgpu::Buffer,
    field: wgpu::Buffer,
    output: wgpu::Buffer,
    counter: wgpu::Buffer,
    params: wgpu::Buffer,
    staging_output: wgpu::Buffer,
    staging_field: wgpu::Buffer,
    staging_counter: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

pub struct AcceleratedBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: Pipelines,
    frame: Option<FrameBuffers>,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl AcceleratedBackend {
    /// Bring up an adapter, device and the compute pipelines. Any failure is
    /// reported as a backend-init error and the dispatcher falls through to
    /// the next backend.
    pub fn initialize() -> RelumeResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RelumeError::backend_init(LABEL, format!("no adapter: {e}")))?;

        let adapter_name = adapter.get_info().name;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("relume"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..Default::default()
        }))
        .map_err(|e| RelumeError::backend_init(LABEL, format!("device request: {e}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("contrast_kernels"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("contrast_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, false),
                storage_entry(5, false),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("contrast_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |entry: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let pipelines = Pipelines {
            prepare: pipeline("prepare"),
            seed: pipeline("seed"),
            sweep_x: pipeline("sweep_x"),
            sweep_y: pipeline("sweep_y"),
            shade: pipeline("shade"),
        };

        log::info!("{LABEL}: using adapter '{adapter_name}'");
        Ok(Self {
            device,
            queue,
            adapter_name,
            bind_group_layout,
            pipelines,
            frame: None,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn ensure_frame_buffers(&mut self, width: u32, height: u32) {
        if self
            .frame
            .as_ref()
            .is_some_and(|f| f.width == width && f.height == height)
        {
            return;
        }
        let pixels = width as u64 * height as u64;
        let buffer = |label: &str, size: u64, usage: wgpu::BufferUsages| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };
        use wgpu::BufferUsages as U;
        let input = buffer("frame_input", pixels * 4, U::STORAGE | U::COPY_DST);
        let coverage = buffer("frame_coverage", pixels * 4, U::STORAGE | U::COPY_DST);
        let field = buffer("frame_field", pixels * 8, U::STORAGE | U::COPY_SRC);
        let output = buffer("frame_output", pixels * 4, U::STORAGE | U::COPY_SRC);
        let counter = buffer("adjusted_counter", 4, U::STORAGE | U::COPY_DST | U::COPY_SRC);
        let params = buffer(
            "contrast_params",
            std::mem::size_of::<Params>() as u64,
            U::UNIFORM | U::COPY_DST,
        );
        let staging_output = buffer("staging_output", pixels * 4, U::COPY_DST | U::MAP_READ);
        let staging_field = buffer("staging_field", pixels * 8, U::COPY_DST | U::MAP_READ);
        let staging_counter = buffer("staging_counter", 4, U::COPY_DST | U::MAP_READ);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("contrast_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: coverage.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: field.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: counter.as_entire_binding(),
                },
            ],
        });

        self.frame = Some(FrameBuffers {
            width,
            height,
            input,
            coverage,
            field,
            output,
            counter,
            params,
            staging_output,
            staging_field,
            staging_counter,
            bind_group,
        });
    }

    fn write_params(&self, config: &ContrastConfig, polarity: Polarity, width: u32, height: u32) {
        let frame = self.frame.as_ref().expect("frame buffers prepared");
        let params = Params {
            width,
            height,
            polarity: match polarity {
                Polarity::DarkOnLight => 1,
                Polarity::LightOnDark => 0,
            },
            _pad0: 0,
            max_distance: config.max_distance,
            target_contrast: config.target_contrast,
            sample_distance: config.sample_distance,
            _pad1: 0.0,
        };
        self.queue
            .write_buffer(&frame.params, 0, bytemuck::bytes_of(&params));
        self.queue.write_buffer(&frame.counter, 0, &[0u8; 4]);
    }

    /// Record the distance sweeps (and one relaxation repeat if asked).
    fn record_sweeps(&self, pass: &mut wgpu::ComputePass<'_>, width: u32, height: u32, relax: bool) {
        let frame = self.frame.as_ref().expect("frame buffers prepared");
        let rounds = if relax { 2 } else { 1 };
        for _ in 0..rounds {
            pass.set_pipeline(&self.pipelines.sweep_x);
            pass.set_bind_group(0, &frame.bind_group, &[]);
            pass.dispatch_workgroups(height.div_ceil(64), 1, 1);
            pass.set_pipeline(&self.pipelines.sweep_y);
            pass.set_bind_group(0, &frame.bind_group, &[]);
            pass.dispatch_workgroups(width.div_ceil(64), 1, 1);
        }
    }

    /// Submit recorded work and wait for it; the single blocking point.
    fn await_readback(&self, buffers: &[&wgpu::Buffer]) -> RelumeResult<()> {
        let (tx, rx) = crossbeam_channel::bounded(buffers.len());
        for buffer in buffers {
            let tx = tx.clone();
            buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        }
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| RelumeError::backend_exec(LABEL, format!("device poll: {e}")))?;
        for _ in buffers {
            rx.recv()
                .map_err(|_| RelumeError::backend_exec(LABEL, "readback callback dropped"))?
                .map_err(|e| RelumeError::backend_exec(LABEL, format!("buffer map: {e}")))?;
        }
        Ok(())
    }

    fn check_error_scope(&self) -> RelumeResult<()> {
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RelumeError::backend_exec(LABEL, error.to_string()));
        }
        Ok(())
    }

    /// Offset field straight from raw RGBA pixels, skipping the host-side
    /// coverage pass entirely.
    pub(crate) fn field_from_rgba(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField> {
        let polarity = coverage::detect_polarity(image, width as usize, height as usize);
        self.ensure_frame_buffers(width, height);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        {
            let frame = self.frame.as_ref().expect("frame buffers prepared");
            self.queue.write_buffer(&frame.input, 0, image);
        }
        self.write_params(&ContrastConfig::default(), polarity, width, height);
        self.run_field_passes(&self.pipelines.prepare, width, height, relax)
    }

    fn run_field_passes(
        &self,
        first: &wgpu::ComputePipeline,
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField> {
        let frame = self.frame.as_ref().expect("frame buffers prepared");
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("field_only"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("field_passes"),
                timestamp_writes: None,
            });
            pass.set_pipeline(first);
            pass.set_bind_group(0, &frame.bind_group, &[]);
            pass.dispatch_workgroups(width.div_ceil(16), height.div_ceil(16), 1);
            self.record_sweeps(&mut pass, width, height, relax);
        }
        let field_bytes = frame.field.size();
        encoder.copy_buffer_to_buffer(&frame.field, 0, &frame.staging_field, 0, field_bytes);
        self.queue.submit(Some(encoder.finish()));
        self.check_error_scope()?;

        self.await_readback(&[&frame.staging_field])?;
        let data: Vec<Offset2> = {
            let view = frame.staging_field.slice(..).get_mapped_range();
            bytemuck::cast_slice::<u8, Offset2>(&view).to_vec()
        };
        frame.staging_field.unmap();
        Ok(OffsetField {
            width: width as usize,
            height: height as usize,
            data,
        })
    }
}

impl PipelineBackend for AcceleratedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accelerated
    }

    fn run_full_pipeline(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        config: &ContrastConfig,
        bufs: &mut WorkBuffers,
    ) -> RelumeResult<u64> {
        let polarity = coverage::detect_polarity(image, width as usize, height as usize);
        self.ensure_frame_buffers(width, height);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        {
            let frame = self.frame.as_ref().expect("frame buffers prepared");
            self.queue.write_buffer(&frame.input, 0, image);
        }
        self.write_params(config, polarity, width, height);

        let frame = self.frame.as_ref().expect("frame buffers prepared");
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("contrast_frame"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("contrast_passes"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.prepare);
            pass.set_bind_group(0, &frame.bind_group, &[]);
            pass.dispatch_workgroups(width.div_ceil(16), height.div_ceil(16), 1);
            self.record_sweeps(&mut pass, width, height, config.use_relaxation);
            pass.set_pipeline(&self.pipelines.shade);
            pass.set_bind_group(0, &frame.bind_group, &[]);
            pass.dispatch_workgroups(width.div_ceil(16), height.div_ceil(16), 1);
        }
        encoder.copy_buffer_to_buffer(
            &frame.output,
            0,
            &frame.staging_output,
            0,
            frame.output.size(),
        );
        encoder.copy_buffer_to_buffer(&frame.counter, 0, &frame.staging_counter, 0, 4);
        self.queue.submit(Some(encoder.finish()));
        self.check_error_scope()?;

        self.await_readback(&[&frame.staging_output, &frame.staging_counter])?;

        let pixels = width as usize * height as usize;
        bufs.output.resize(pixels * 4, 0);
        {
            let view = frame.staging_output.slice(..).get_mapped_range();
            bufs.output.copy_from_slice(&view);
        }
        frame.staging_output.unmap();

        let adjusted = {
            let view = frame.staging_counter.slice(..).get_mapped_range();
            u32::from_le_bytes([view[0], view[1], view[2], view[3]]) as u64
        };
        frame.staging_counter.unmap();
        Ok(adjusted)
    }

    fn compute_distance_field(
        &mut self,
        levels: &[f32],
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField> {
        self.ensure_frame_buffers(width, height);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        {
            let frame = self.frame.as_ref().expect("frame buffers prepared");
            self.queue
                .write_buffer(&frame.coverage, 0, bytemuck::cast_slice(levels));
        }
        self.write_params(
            &ContrastConfig::default(),
            Polarity::DarkOnLight,
            width,
            height,
        );
        self.run_field_passes(&self.pipelines.seed, width, height, relax)
    }
}
