//! Lighting pipeline viewer
//!
//! Run with:
//!   cargo run --example viewer
//!   cargo run --example viewer -- --path forward
//!   cargo run --example viewer -- --headless --output frame.png
//!   cargo run --example viewer -- --headless --backend wgpu --output frame.png
//!
//! Controls:
//!   G        - Toggle the G-buffer debug view
//!   P        - Switch between deferred and forward lighting
//!   V        - Toggle light volume wireframes
//!   Space    - Pause the camera orbit
//!   Escape   - Exit

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use glam::{Vec3, Vec4};
use shading_pipeline::{
    backend::{AddressMode, FilterMode, GraphicsBackend, ReadbackSource, SoftwareBackend},
    pipeline::DebugOptions,
    resources::{save_png, Material, Mesh, TextureData},
    scene::{
        AmbientLight, Attenuation, Camera, DirectionalLight, MainCamera, MeshRenderer, PointLight,
        RenderQueue, Skybox, SpotLight, Transform,
    },
    window, RenderPath, RendererConfig, RenderingSystem, WgpuBackend, With, World,
};
use winit::keyboard::KeyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Wgpu,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PathArg {
    Deferred,
    Forward,
}

impl From<PathArg> for RenderPath {
    fn from(path: PathArg) -> Self {
        match path {
            PathArg::Deferred => RenderPath::Deferred,
            PathArg::Forward => RenderPath::Forward,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Render the demo scene in a window or to a PNG")]
struct Args {
    /// Render one frame without a window and save it
    #[arg(long)]
    headless: bool,

    /// Backend for headless rendering; windows always use wgpu
    #[arg(long, value_enum, default_value = "software")]
    backend: BackendKind,

    #[arg(long, value_enum, default_value = "deferred")]
    path: PathArg,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Frames rendered before the headless capture
    #[arg(long, default_value_t = 2)]
    frames: u32,

    #[arg(long, default_value = "frame.png")]
    output: PathBuf,

    #[arg(long)]
    no_ssao: bool,

    #[arg(long)]
    no_shadows: bool,
}

const ORBIT_RADIUS: f32 = 12.0;
const ORBIT_HEIGHT: f32 = 6.0;
const ORBIT_PERIOD: f32 = 30.0;

fn camera_transform(time: f32) -> Transform {
    let angle = time / ORBIT_PERIOD * TAU;
    let eye = Vec3::new(angle.cos() * ORBIT_RADIUS, ORBIT_HEIGHT, angle.sin() * ORBIT_RADIUS);
    Transform::looking_at(eye, Vec3::new(0.0, 1.0, 0.0), Vec3::Y)
}

/// Populate the world and upload meshes, textures and the skybox
fn setup_scene(renderer: &mut RenderingSystem, world: &mut World, shadows: bool) -> Result<(), Box<dyn std::error::Error>> {
    let backend = renderer.backend_mut();
    let cube = backend.create_mesh(&Mesh::cube())?;
    let sphere = backend.create_mesh(&Mesh::sphere(0.75, 32, 16))?;
    let plane = backend.create_mesh(&Mesh::plane(24.0, 24.0, 1))?;
    let checker = TextureData::checkerboard(256, 32, Vec4::new(0.9, 0.9, 0.9, 1.0), Vec4::new(0.3, 0.3, 0.35, 1.0))
        .upload(backend, FilterMode::Linear, AddressMode::Repeat)?;
    let sky = TextureData::sky_gradient(64, Vec3::new(0.2, 0.4, 0.9), Vec3::new(0.8, 0.85, 0.9), Vec3::new(0.2, 0.18, 0.15))
        .upload(backend, FilterMode::Linear, AddressMode::ClampToEdge)?;
    renderer.set_skybox(Some(Skybox::new(sky)));

    world.insert_resource(AmbientLight::new(Vec3::splat(0.08), 1.0));
    world.spawn((
        Camera::perspective(60.0, 0.1, 100.0),
        camera_transform(0.0),
        MainCamera,
    ));

    world.spawn((
        MeshRenderer::new(plane, Material::rubber(Vec3::ONE).with_diffuse_texture(checker)),
        Transform::new(),
    ));
    for i in 0..5 {
        let x = (i as f32 - 2.0) * 2.5;
        let hue = i as f32 / 5.0;
        let color = Vec3::new(0.5 + 0.5 * (hue * TAU).cos(), 0.5 + 0.5 * (hue * TAU + 2.1).cos(), 0.5 + 0.5 * (hue * TAU + 4.2).cos());
        world.spawn((
            MeshRenderer::new(cube, Material::plastic(color)),
            Transform::from_position(Vec3::new(x, 0.5, -2.0)),
        ));
    }
    world.spawn((
        MeshRenderer::new(sphere, Material::chrome().with_queue(RenderQueue::EnviroMapStatic)),
        Transform::from_position(Vec3::new(-2.0, 1.0, 2.0)),
    ));
    world.spawn((
        MeshRenderer::new(sphere, Material::chrome().with_queue(RenderQueue::EnviroMapDynamic)),
        Transform::from_position(Vec3::new(2.0, 1.0, 2.0)),
    ));
    world.spawn((
        MeshRenderer::new(sphere, Material::glass(Vec3::new(0.4, 0.8, 1.0), 0.4)),
        Transform::from_position(Vec3::new(0.0, 1.0, 3.5)),
    ));

    world.spawn((
        DirectionalLight::new(Vec3::new(1.0, 0.95, 0.85), 0.8)
            .with_half_size(14.0)
            .with_shadows(shadows),
        Transform::looking_to(Vec3::new(6.0, 10.0, 4.0), Vec3::new(-0.6, -1.0, -0.4), Vec3::Y),
    ));
    world.spawn((
        PointLight::new(Vec3::new(1.0, 0.4, 0.2), 2.0, Attenuation::new(1.0, 0.35, 0.44)).with_shadows(shadows),
        Transform::from_position(Vec3::new(0.0, 2.5, 0.0)),
    ));
    world.spawn((
        SpotLight::new(Vec3::new(0.3, 0.6, 1.0), 3.0, Attenuation::new(1.0, 0.09, 0.032), 25.0).with_shadows(shadows),
        Transform::looking_at(Vec3::new(-6.0, 6.0, 6.0), Vec3::new(-2.0, 0.0, 2.0), Vec3::Y),
    ));
    Ok(())
}

fn config(args: &Args, width: u32, height: u32) -> RendererConfig {
    let mut config = RendererConfig::default()
        .with_size(width, height)
        .with_path(args.path.into());
    config.ssao.enabled = !args.no_ssao;
    config
}

fn run_headless(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let backend: Box<dyn GraphicsBackend> = match args.backend {
        BackendKind::Software => Box::new(SoftwareBackend::new(args.width, args.height)),
        BackendKind::Wgpu => Box::new(WgpuBackend::headless(args.width, args.height)?),
    };
    let mut renderer = RenderingSystem::new(backend, config(args, args.width, args.height))?;
    let mut world = World::new();
    renderer.on_init(&mut world);
    setup_scene(&mut renderer, &mut world, !args.no_shadows)?;

    let start = Instant::now();
    for _ in 0..args.frames.max(1) {
        renderer.on_update(&mut world, 1.0 / 60.0)?;
    }
    log::info!(
        "Rendered {} frame(s) in {:.2?}, {} draw calls in the last",
        args.frames.max(1),
        start.elapsed(),
        renderer.statistics().draw_calls
    );

    let pixels = renderer.backend_mut().read_pixels(ReadbackSource::Surface)?;
    save_png(&pixels, &args.output)?;
    println!("Saved {}", args.output.display());
    renderer.on_destroy(&mut world);
    Ok(())
}

fn run_windowed(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    println!("Controls:");
    println!("  G      - Toggle G-buffer view");
    println!("  P      - Switch render path");
    println!("  V      - Toggle light volumes");
    println!("  Space  - Pause orbit");
    println!("  Escape - Exit");

    let mut state: Option<(RenderingSystem, World)> = None;
    let mut last_frame = Instant::now();
    let mut time = 0.0f32;
    let mut paused = false;
    let mut debug = DebugOptions::default();

    window::run("Shading Pipeline", args.width, args.height, move |window| {
        if window.should_close() {
            return false;
        }
        if state.is_none() {
            let (width, height) = window.dimensions();
            let created = WgpuBackend::new(window.window_arc())
                .map_err(Box::<dyn std::error::Error>::from)
                .and_then(|backend| Ok(RenderingSystem::new(Box::new(backend), config(&args, width, height))?))
                .and_then(|mut renderer| {
                    let mut world = World::new();
                    renderer.on_init(&mut world);
                    setup_scene(&mut renderer, &mut world, !args.no_shadows)?;
                    Ok((renderer, world))
                });
            match created {
                Ok(created) => state = Some(created),
                Err(e) => {
                    eprintln!("Failed to start renderer: {e}");
                    return false;
                }
            }
        }
        let Some((renderer, world)) = state.as_mut() else {
            return false;
        };

        for key in window.take_key_presses() {
            match key {
                KeyCode::Escape => return false,
                KeyCode::KeyG => {
                    renderer.toggle_debug_view();
                    debug.gbuffer = !debug.gbuffer;
                }
                KeyCode::KeyV => {
                    debug.light_volumes = !debug.light_volumes;
                    renderer.set_debug_options(debug);
                }
                KeyCode::KeyP => {
                    let path = match renderer.config().path {
                        RenderPath::Deferred => RenderPath::Forward,
                        RenderPath::Forward => RenderPath::Deferred,
                    };
                    println!("Render path: {path:?}");
                    renderer.set_path(path);
                }
                KeyCode::Space => paused = !paused,
                _ => {}
            }
        }

        if window.was_resized() {
            let (width, height) = window.dimensions();
            if let Err(e) = renderer.resize(width, height) {
                log::error!("Resize failed: {e}");
            }
            window.clear_resize_flag();
        }

        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;
        if !paused {
            time += dt;
        }
        let mut cameras = world.query_filtered::<&mut Transform, With<MainCamera>>();
        for mut transform in cameras.iter_mut(world) {
            *transform = camera_transform(time);
        }

        match renderer.on_update(world, dt) {
            Ok(()) => true,
            Err(e) => {
                // Lost surfaces are reconfigured by the backend; retry next frame
                log::warn!("Frame skipped: {e}");
                true
            }
        }
    })?;
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = if args.headless {
        run_headless(&args)
    } else {
        run_windowed(args)
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
