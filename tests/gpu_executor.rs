/// Headless wgpu tests: the batching renderer's command list replayed by the
/// executor into an offscreen texture, then read back.
///
/// Tests return early when no adapter is available.
///
/// Run with:   cargo test --test gpu_executor
use futures::executor::block_on;
use strata::gpu::{BuiltinPipelines, WgpuExecutor};
use strata::{Renderer, RendererConfig, SceneGraph, TextureId};
use strata_test_scenes::{check_pixels, PixelExpectation, CANVAS_HEIGHT, CANVAS_WIDTH};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::default();
    let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::default(),
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok()?;
    block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("strata_test_device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::downlevel_defaults(),
        memory_hints: Default::default(),
        trace: Default::default(),
    }))
    .ok()
}

/// Renders `scene` and returns premultiplied `0xAARRGGBB` pixels.
fn render_offscreen(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    scene: &mut SceneGraph,
) -> Vec<u32> {
    let (width, height) = (CANVAS_WIDTH, CANVAS_HEIGHT);
    let mut renderer = Renderer::new(RendererConfig::default());
    renderer.resize((width, height));

    let mut executor = WgpuExecutor::new(device, COLOR_FORMAT);
    let mut pipelines = BuiltinPipelines::new(device, executor.layouts(), COLOR_FORMAT);
    // Texture tiles only need something bound; their pixels are not checked.
    for texture in [TextureId(100), TextureId(101)] {
        pipelines.upload_texture(
            device,
            queue,
            executor.layouts(),
            texture,
            (1, 1),
            &[255, 255, 255, 255],
        );
    }

    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen_target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
    let depth_stencil = WgpuExecutor::create_depth_stencil_texture(device, (width, height));
    let depth_stencil_view = depth_stencil.create_view(&wgpu::TextureViewDescriptor::default());

    let commands = renderer.render(scene);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("offscreen_encoder"),
    });
    let stats = executor
        .execute(
            device,
            queue,
            &mut encoder,
            &target_view,
            &depth_stencil_view,
            (width, height),
            commands,
            &mut pipelines,
        )
        .expect("command list replays");
    assert!(stats.draw_calls > 0);

    // 320 pixels * 4 bytes is already a multiple of COPY_BYTES_PER_ROW_ALIGNMENT.
    let bytes_per_row = width * 4;
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("offscreen_readback"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &target,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = readback.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = device.poll(wgpu::PollType::Wait);
    receiver
        .recv()
        .expect("map callback ran")
        .expect("readback buffer maps");

    let pixels = slice
        .get_mapped_range()
        .chunks_exact(4)
        .map(|rgba| u32::from_be_bytes([rgba[3], rgba[0], rgba[1], rgba[2]]))
        .collect();
    readback.unmap();
    pixels
}

#[test]
fn main_scene_renders_flat_tiles_on_gpu() {
    let Some((device, queue)) = headless_device() else {
        eprintln!("no wgpu adapter available, skipping");
        return;
    };

    let mut scene = SceneGraph::new();
    strata_test_scenes::build_main_scene(&mut scene);
    let pixels = render_offscreen(&device, &queue, &mut scene);

    // Only tiles whose GPU shading matches the software paint exactly.
    let expectations = [
        PixelExpectation::opaque(40, 40, 220, 50, 50, "t01_interior"),
        PixelExpectation::background(5, 5, "t01_outside_is_canvas_bg"),
        PixelExpectation::opaque(200, 40, 50, 50, 220, "t03_moved_interior"),
        PixelExpectation::opaque(30, 110, 150, 200, 150, "t05_inside_clip"),
        PixelExpectation::background(50, 130, "t05_overflow_clipped"),
        PixelExpectation::opaque(100, 100, 100, 150, 220, "t06_inside_both"),
        PixelExpectation::background(135, 100, "t06_outside_tall_clip"),
        PixelExpectation::opaque(200, 120, 127, 127, 127, "t07_half_black_over_white"),
        PixelExpectation::opaque(280, 120, 127, 63, 191, "t08_blue_over_red"),
        PixelExpectation::background(280, 200, "t12_blocked_is_bg"),
        PixelExpectation::opaque(200, 280, 0, 0, 0, "t15_single_pixel"),
    ];
    let failures = check_pixels(&pixels, CANVAS_WIDTH, CANVAS_HEIGHT, &expectations);
    if !failures.is_empty() {
        panic!(
            "{} pixel expectation(s) failed:\n{}",
            failures.len(),
            failures.join("\n"),
        );
    }
}
