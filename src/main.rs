use std::error::Error;
use std::ffi::c_void;
use std::fmt::Display;
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use sdl2::event::{Event, WindowEvent};
use sdl2::mouse::MouseButton;
use sdl2::rect::Point;
use sdl2::video::GLProfile;

use meshview::camera::Camera;
use meshview::model::Model;
use meshview::renderer::{GlDevice, ShaderProgram};

/// Shows a 3D model. Keys: f/n move closer/further, w/a/s/d move, q/e roll,
/// l toggles lighting, r resets. Drag with the left mouse button to rotate.
#[derive(Parser, Debug)]
#[command(name = "meshview")]
struct ViewerArgs {
    /// Model file (.obj, .gltf or .glb)
    #[arg(value_name = "FILE")]
    model: PathBuf,

    /// Initial window width
    #[arg(long, default_value_t = 500)]
    width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 500)]
    height: u32,

    /// Vertical field of view, in degrees
    #[arg(long, default_value_t = 45.0)]
    fov: f32,

    /// Start with lighting enabled
    #[arg(long)]
    lighting: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = ViewerArgs::parse();

    let sdl_context = sdl2::init().map_err(SdlErr)?;
    let video_subsystem = sdl_context.video().map_err(SdlErr)?;
    let gl_attr = video_subsystem.gl_attr();
    gl_attr.set_context_profile(GLProfile::GLES);
    gl_attr.set_context_version(3, 0);
    gl_attr.set_depth_size(24);
    let window = video_subsystem
        .window(env!("CARGO_PKG_NAME"), args.width, args.height)
        .resizable()
        .opengl()
        .build()?;
    let _gl_context = window.gl_create_context().map_err(SdlErr)?;
    let mut event_pump = sdl_context.event_pump().map_err(SdlErr)?;

    let device = GlDevice::load(|name| video_subsystem.gl_get_proc_address(name) as *const c_void);
    let (width, height) = window.drawable_size();
    device.resize(width as i32, height as i32);
    let device = Rc::new(device);
    let program = ShaderProgram::new()?;

    let model = Model::load(device.clone(), &args.model);
    if model.is_empty() {
        anyhow::bail!("{}", model.error_info());
    }

    let mut camera = Camera {
        use_lighting: args.lighting,
        ..Camera::default()
    };
    let mut drag_origin: Option<Point> = None;

    'running: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => break 'running,
                Event::Window {
                    win_event: WindowEvent::SizeChanged(..),
                    ..
                } => {
                    let (width, height) = window.drawable_size();
                    device.resize(width as i32, height as i32);
                }
                Event::KeyDown {
                    keycode: Some(keycode),
                    ..
                } => {
                    if let Some(key) = char::from_u32(keycode as i32 as u32) {
                        camera.apply_key(key);
                    }
                }
                Event::MouseButtonDown {
                    mouse_btn: MouseButton::Left,
                    x,
                    y,
                    ..
                } => drag_origin = Some(Point::new(x, y)),
                Event::MouseButtonUp {
                    mouse_btn: MouseButton::Left,
                    ..
                } => drag_origin = None,
                Event::MouseMotion { x, y, .. } => {
                    if let Some(origin) = &mut drag_origin {
                        if camera.apply_drag(x - origin.x(), y - origin.y()) {
                            *origin = Point::new(x, y);
                        }
                    }
                }
                _ => {}
            }
        }

        let (width, height) = window.drawable_size();
        let aspect_ratio = width as f32 / height.max(1) as f32;
        device.clear();
        model.draw(&program, &camera.frame_uniforms(aspect_ratio, args.fov));
        window.gl_swap_window();
    }

    Ok(())
}

#[derive(Debug)]
pub struct SdlErr(String);
impl Display for SdlErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sdl error: {}", self.0)
    }
}
impl Error for SdlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}
