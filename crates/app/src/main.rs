//! framegraph demo: a spinning cube drawn by the forward renderer.

mod cube;

use std::time::Duration;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3, Vec4};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use framegraph_core::{FrameTimer, RendererConfig};
use framegraph_platform::{ActiveEventLoop, EventLoop, Window, WindowEvent};
use framegraph_renderer::{
    Camera, DrawList, ForwardRenderer, FrameOutcome, GpuMesh, PointLight, SceneCounts,
};

struct App {
    config: RendererConfig,
    // Declared before the renderer: meshes must go before the device.
    scene: Option<DrawList>,
    renderer: Option<ForwardRenderer>,
    window: Option<Window>,
    camera: Camera,
    timer: FrameTimer,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            scene: None,
            renderer: None,
            window: None,
            camera: Camera {
                position: Vec3::new(2.0, 1.5, 3.0),
                ..Camera::default()
            },
            timer: FrameTimer::new(Duration::from_secs(2)),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(
            event_loop,
            self.config.window_width,
            self.config.window_height,
            "framegraph",
        )?;

        let counts = SceneCounts {
            materials: 1,
            lights: 1,
            meshes: 1,
        };
        let renderer = ForwardRenderer::new(&window, &self.config, counts)
            .context("Failed to create the forward renderer")?;

        let (vertices, indices) = cube::cube();
        let mut scene = DrawList::new();
        let mesh = scene.add_mesh(GpuMesh::new(renderer.device().clone(), &vertices, &indices)?);
        scene.add_instance(mesh, Mat4::IDENTITY, 0)?;
        scene.add_light(PointLight {
            position: Vec4::new(3.0, 4.0, 2.0, 20.0),
            color: Vec4::new(1.0, 0.95, 0.9, 1.0),
        });

        let extent = renderer.extent();
        self.camera.set_aspect(extent.width, extent.height);

        info!("Initialization complete, entering main loop");
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.scene = Some(scene);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer), Some(scene)) =
            (&self.window, &mut self.renderer, &mut self.scene)
        else {
            return Ok(());
        };

        let (_, stats) = self.timer.tick();
        if let Some(stats) = stats {
            info!(
                "{:.1} fps ({:.2} ms/frame, {} frames)",
                stats.fps, stats.frame_time_ms, stats.total_frames
            );
        }

        if renderer.needs_rebuild() {
            if window.is_minimized() {
                return Ok(());
            }
            renderer.resize(window.width(), window.height())?;
            let extent = renderer.extent();
            self.camera.set_aspect(extent.width, extent.height);
        }

        let t = self.timer.elapsed_secs();
        scene.set_transform(0, Mat4::from_rotation_y(t) * Mat4::from_rotation_x(t * 0.5))?;
        renderer.update(&self.camera);

        if renderer.render(&*scene)? == FrameOutcome::Skipped {
            warn!("Frame skipped, surface will be rebuilt");
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.scene = None;
        self.renderer = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            error!("Initialization failed: {:#}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.set_resized();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    error!("Render error: {:#}", e);
                    self.shutdown();
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    framegraph_core::init_logging();

    let config = RendererConfig::from_env()?;
    info!(
        "Starting framegraph demo ({} frames in flight, MSAA {}, shaders in {:?})",
        config.frames_in_flight, config.multisampling, config.shader_dir
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
