// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use prism_core::init_tracing;
use prism_render::{RenderSettings, RenderSize, Renderer};
use prism_render_vk::VkRenderer;
use prism_scene::UniformBufferObject;
use std::time::{Duration, Instant};
use tracing::{error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::Key,
    window::{Window, WindowId},
};

mod config;

use config::{AppCfg, Args};

struct App {
    cfg: AppCfg,
    settings: RenderSettings,
    max_frames: u64,

    // Field order matters: the renderer must drop before the window.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    vsync: bool,
    started: Instant,
    presented: u64,
    frames: u32,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, settings: RenderSettings, max_frames: u64) -> Self {
        let now = Instant::now();
        Self {
            vsync: settings.present == prism_render::PresentPreference::Vsync,
            cfg,
            settings,
            max_frames,
            renderer: None,
            window: None,
            render_size: RenderSize::new(0, 0),
            started: now,
            presented: 0,
            frames: 0,
            last_fps_instant: now,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = prism_platform::create_main_window(
            event_loop,
            &self.cfg.window.title,
            self.cfg.window.size(),
        )?;
        self.render_size = prism_platform::framebuffer_extent(&window);

        let scene = prism_scene::demo_scene();
        let renderer = VkRenderer::new(&window, &window, self.render_size, &self.settings, &scene)?;
        info!(
            "vk renderer up, features {:?}, present {:?}",
            self.settings.features, self.settings.present
        );

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Records the error for `main` and shuts the loop down.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("fatal: {e:#}");
        self.fatal = Some(e);
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<bool> {
        let Some(renderer) = &mut self.renderer else {
            return Ok(true);
        };
        let ubo = UniformBufferObject::spinning(
            self.started.elapsed().as_secs_f32(),
            self.render_size.width,
            self.render_size.height,
        );
        let status = renderer.render(ubo.as_bytes())?;
        if status.presented() {
            self.presented += 1;
            self.frames = self.frames.saturating_add(1);
        }

        let now = Instant::now();
        let dt = now - self.last_fps_instant;
        if dt >= Duration::from_secs(1) {
            info!("fps: {:.1}", self.frames as f64 / dt.as_secs_f64());
            self.frames = 0;
            self.last_fps_instant = now;
        }

        Ok(self.max_frames == 0 || self.presented < self.max_frames)
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = prism_platform::to_render_size(new_size);
                if let Some(r) = &mut self.renderer {
                    r.resize(self.render_size);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && matches!(event.logical_key.as_ref(), Key::Character("v" | "V"))
                {
                    self.vsync = !self.vsync;
                    info!("vsync -> {}", self.vsync);
                    if let Some(r) = &mut self.renderer {
                        r.set_vsync(self.vsync);
                    }
                }
            }

            WindowEvent::RedrawRequested => match self.redraw() {
                Ok(true) => {}
                Ok(false) => {
                    info!("presented {} frames, exiting", self.presented);
                    self.renderer = None;
                    self.window = None;
                    event_loop.exit();
                }
                Err(e) => self.fail(event_loop, e),
            },

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.render_size.is_zero() {
            // Minimized: sleep until the next resize.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config::load_cfg(&args.config);
    let settings = cfg.render_settings(&args);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(cfg, settings, args.max_frames);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
