// src/main.rs
//! Demo: a spinning sprite and a polygon rendered off-screen, then bloomed onto the screen.
//!
//! `slop2d-demo [--headless] [--profile] [--frames N] [--config path.json]`

use std::fs::File;
use std::io::Write;
use std::panic;
use std::backtrace::Backtrace;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Mat4, UVec2, Vec2, Vec3};
use log::{error, info, warn};

use slop2d::{
    BloomTargets, Color, Engine, EngineConfig, GraphicsDevice, PostEffect, PostOptions, RectF,
    RenderPassParameter, RenderTexture, RenderedCamera, RenderedPolygon, RenderedSprite, Texture,
};

struct Args {
    headless: bool,
    profile: bool,
    frames: Option<u64>,
    config: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args { headless: false, profile: false, frames: None, config: None };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--headless" => args.headless = true,
            "--profile" => args.profile = true,
            "--frames" => args.frames = it.next().and_then(|n| n.parse().ok()),
            "--config" => args.config = it.next(),
            other => eprintln!("ignoring unknown argument '{}'", other),
        }
    }
    args
}

fn main() -> Result<()> {
    setup_crash_handler();
    let args = parse_args();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path))?,
        None => EngineConfig::default().with_title("slop2d demo"),
    };
    let config = EngineConfig { profiling: config.profiling || args.profile, ..config };

    let mut engine = if args.headless {
        Engine::headless(EngineConfig { graphics_only: true, ..config })?
    } else {
        match Engine::windowed(config.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                warn!("no window ({}), running headless", e);
                Engine::headless(config)?
            }
        }
    };
    // a headless run without a frame count would never end
    let frames = args.frames.or(args.headless.then_some(120));

    info!("running on the {} device", engine.device().name());
    let result = run(&mut engine, frames);
    if let Err(e) = &result {
        error!("demo stopped: {:#}", e);
    }
    if args.headless {
        engine.graphics_mut().save_screenshot("slop2d-demo.png");
        // written when the next frame ends
        if engine.begin_frame() {
            engine.end_frame();
        }
    }
    if engine.config().profiling {
        engine.profiler().dump_to_file("slop2d-profile.json")?;
    }
    engine.terminate();
    result
}

struct Offscreen {
    scene: RenderTexture,
    bloom: BloomTargets,
}

impl Offscreen {
    fn create(device: &Arc<dyn GraphicsDevice>, size: UVec2) -> Result<Self> {
        let format = slop2d::TextureFormat::R8G8B8A8Unorm;
        Ok(Self {
            scene: RenderTexture::create(device, size.x, size.y, format)?,
            bloom: BloomTargets::new(device, size, format)?,
        })
    }
}

fn run(engine: &mut Engine, frames: Option<u64>) -> Result<()> {
    // 1. Scene
    let sprite = RenderedSprite::create();
    sprite.set_src(RectF::new(0.0, 0.0, 96.0, 96.0));
    sprite.set_color(Color::rgba(255, 217, 77, 255));

    let polygon = RenderedPolygon::create();
    let points: Vec<Vec2> = (0..6)
        .map(|i| {
            let a = i as f32 / 6.0 * std::f32::consts::TAU;
            Vec2::new(a.cos(), a.sin()) * 80.0
        })
        .collect();
    polygon.create_vertexes_by_vector2(&points);
    polygon.overwrite_vertexes_color(Color::rgba(51, 153, 255, 255));

    // 2. Off-screen camera and post chain
    let device = Arc::clone(engine.device());
    let mut offscreen = Offscreen::create(&device, engine.graphics().screen_texture().size())?;
    let camera = RenderedCamera::create();
    camera.set_target_texture(Some(offscreen.scene.clone()));
    camera.set_render_pass_parameter(RenderPassParameter::clear(Color::rgba(20, 31, 46, 255)));
    let post = PostEffect::new(engine.builtin_shaders(), PostOptions { bloom_threshold: 0.6, ..Default::default() })?;

    // 3. Loop
    let mut time = 0.0f32;
    while engine.do_events() {
        if frames.is_some_and(|n| engine.fps().frame_count() >= n) {
            break;
        }

        let screen = engine.graphics().screen_texture();
        if screen.size() != offscreen.scene.size() {
            offscreen = Offscreen::create(&device, screen.size())?;
            camera.set_target_texture(Some(offscreen.scene.clone()));
        }
        let center = screen.size().as_vec2() * 0.5;

        time += engine.fps().delta_seconds();
        sprite.set_transform(
            Mat4::from_translation(Vec3::new(center.x, center.y, 0.0))
                * Mat4::from_rotation_z(time)
                * Mat4::from_translation(Vec3::new(-48.0, -48.0, 0.0)),
        );
        polygon.set_transform(Mat4::from_translation(Vec3::new(center.x + 160.0 * time.cos(), center.y, 0.0)));

        if !engine.begin_frame() {
            match engine.graphics().last_frame_error() {
                Some(e) => anyhow::bail!("cannot begin frame: {}", e),
                None => continue,
            }
        }
        engine.renderer_mut().set_camera(&camera);
        engine.renderer_mut().draw_polygon(&polygon);
        engine.renderer_mut().draw_sprite(&sprite);
        engine.renderer_mut().reset_camera();
        engine.render();

        let cmd = engine.graphics_mut().command_list()?;
        post.light_bloom(cmd, &offscreen.scene, &offscreen.bloom, &screen)?;

        if !engine.end_frame() {
            if let Some(e) = engine.graphics().last_frame_error() {
                anyhow::bail!("frame failed: {}", e);
            }
        }
        engine.fps().log_every(300);
    }
    Ok(())
}

/// Writes panics with a backtrace to `slop2d_crash.log`.
fn setup_crash_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();
        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let location = panic_info
            .location()
            .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));

        let crash_msg = format!("=== slop2d crash ===\nReason: {}\nLocation: {}\n\nStack Trace:\n{}", msg, location, backtrace);
        eprintln!("\x1b[31;1m{}\x1b[0m", crash_msg);
        if let Ok(mut file) = File::create("slop2d_crash.log") {
            let _ = file.write_all(crash_msg.as_bytes());
        }
    }));
}
