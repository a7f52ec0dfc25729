use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use clap::Parser;
use pixels::{Pixels, SurfaceTexture};
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source, source::SquareWave};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, KeyCode, NamedKey, PhysicalKey},
    window::{Window, WindowId},
};

use chip8_vm::{Chip8, Chip8Runner, DISPLAY_X, DISPLAY_Y, Display, RomLibrary, Speed, u4};

const PIXEL_ON: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
const PIXEL_OFF: [u8; 4] = [0x00, 0x00, 0x00, 0xff];

/// Mapping from physical keyboard keys to CHIP-8 hex keypad (0x0-0xF).
const KEY_MAP: [KeyCode; 16] = [
    KeyCode::KeyX,   // 0x00
    KeyCode::Digit1, // 0x01
    KeyCode::Digit2, // 0x02
    KeyCode::Digit3, // 0x03
    KeyCode::KeyQ,   // 0x04
    KeyCode::KeyW,   // 0x05
    KeyCode::KeyE,   // 0x06
    KeyCode::KeyA,   // 0x07
    KeyCode::KeyS,   // 0x08
    KeyCode::KeyD,   // 0x09
    KeyCode::KeyZ,   // 0x0A
    KeyCode::KeyC,   // 0x0B
    KeyCode::Digit4, // 0x0C
    KeyCode::KeyR,   // 0x0D
    KeyCode::KeyF,   // 0x0E
    KeyCode::KeyV,   // 0x0F
];

struct App {
    pixels: Option<Pixels<'static>>,
    window: Option<Arc<Window>>,

    /// Audio output stream (must be kept alive).
    _audio_stream: OutputStream,
    audio_sink: Sink,

    runner: Chip8Runner,
    /// Set when started on a directory; PageDown walks through it.
    library: Option<RomLibrary>,
    rom_index: usize,
    rom_path: PathBuf,
    /// Used for delta time calculation.
    last_frame_instant: Instant,

    /// Stores the result of the application to be returned from main.
    exit_result: anyhow::Result<()>,
}

impl App {
    fn new(args: &Args) -> anyhow::Result<Self> {
        // Initialize audio
        let mut _audio_stream = OutputStreamBuilder::open_default_stream()
            .context("Failed to open audio output stream")?;
        _audio_stream.log_on_drop(false);

        let audio_sink = Sink::connect_new(_audio_stream.mixer());
        audio_sink.pause();
        audio_sink.append(SquareWave::new(440.0).amplify(0.25));

        // Initialize CHIP-8
        let mut chip8 = match args.seed {
            Some(seed) => Chip8::with_seed(seed),
            None => Chip8::new(),
        };
        chip8.set_strict(args.strict);

        let (library, rom_path) = if args.rom_path.is_dir() {
            let library =
                RomLibrary::open(&args.rom_path).context("Failed to list ROM directory")?;
            let rom_path = library
                .get(args.index)
                .with_context(|| {
                    format!(
                        "No ROM at index {} ({} found in {})",
                        args.index,
                        library.len(),
                        args.rom_path.display()
                    )
                })?
                .to_path_buf();
            (Some(library), rom_path)
        } else {
            (None, args.rom_path.clone())
        };

        chip8
            .load_file(&rom_path)
            .context("Failed to load ROM into CHIP-8 memory")?;
        log::info!("Loaded {} at {:?} speed", rom_path.display(), args.speed);

        Ok(Self {
            pixels: None,
            window: None,

            _audio_stream,
            audio_sink,

            runner: Chip8Runner::new(chip8, args.speed),
            library,
            rom_index: args.index,
            rom_path,
            last_frame_instant: Instant::now(),
            exit_result: Ok(()),
        })
    }

    fn process_display(&mut self) {
        if self.runner.chip8_ref().is_display_changed() {
            self.repaint();
        }
    }

    /// Copies the whole display into the frame, whether or not it changed.
    fn repaint(&mut self) {
        self.runner.chip8_mut().take_display_changed();
        if let Some(pixels) = self.pixels.as_mut() {
            paint_frame(pixels.frame_mut(), self.runner.chip8_ref().display());
        }
    }

    /// Reloads the current ROM. A reset program usually starts by clearing
    /// an already blank screen, so the old picture is replaced right away.
    fn reset(&mut self) {
        match self.runner.load_file(&self.rom_path) {
            Ok(()) => log::info!("Loaded {}", self.rom_path.display()),
            Err(e) => log::error!("Failed to reload ROM: {e}"),
        }
        self.repaint();
        self.update_title();
    }

    fn next_rom(&mut self) {
        let Some(library) = &self.library else {
            return;
        };
        let index = library.next_index(self.rom_index);
        let Some(path) = library.get(index) else {
            return;
        };

        self.rom_index = index;
        self.rom_path = path.to_path_buf();
        self.reset();
    }

    fn cycle_speed(&mut self) {
        let speed = self.runner.speed().next();
        self.runner.set_speed(speed);
        log::info!("Speed set to {speed:?}");
        self.update_title();
    }

    fn update_title(&self) {
        if let Some(window) = &self.window {
            let name = self
                .rom_path
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default();
            let state = if self.runner.is_paused() { " (paused)" } else { "" };
            window.set_title(&format!(
                "chip8-vm - {name} [{:?}]{state}",
                self.runner.speed()
            ));
        }
    }

    fn try_resumed(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window = {
            let size = LogicalSize::new(DISPLAY_X as u32 * 10, DISPLAY_Y as u32 * 10);
            let min_size = LogicalSize::new(DISPLAY_X as u32, DISPLAY_Y as u32);

            Arc::new(
                event_loop
                    .create_window(
                        Window::default_attributes()
                            .with_title("chip8-vm")
                            .with_inner_size(size)
                            .with_min_inner_size(min_size),
                    )
                    .context("Failed to create window")?,
            )
        };

        self.window = Some(window.clone());
        self.pixels = {
            let window_size = window.inner_size();
            let surface_texture =
                SurfaceTexture::new(window_size.width, window_size.height, window.clone());

            let pixels = Pixels::new(DISPLAY_X as u32, DISPLAY_Y as u32, surface_texture)
                .context("Failed to create pixels surface")?;

            window.request_redraw();
            Some(pixels)
        };

        // Paint the first frame even if the program never draws
        self.repaint();
        self.update_title();

        // Avoid large dt on first frame
        self.last_frame_instant = Instant::now();
        Ok(())
    }

    fn try_window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        event: WindowEvent,
    ) -> anyhow::Result<()> {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                self.pixels
                    .as_mut()
                    .context("Pixels surface missing")?
                    .resize_surface(size.width, size.height)
                    .context("Failed to resize pixels surface")?;
            }

            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = (now - self.last_frame_instant).as_secs_f32();
                self.last_frame_instant = now;

                self.runner.update(dt).context("Chip8 Execution error")?;

                if self.runner.sound_active() {
                    self.audio_sink.play();
                } else {
                    self.audio_sink.pause();
                }

                self.process_display();

                self.pixels
                    .as_ref()
                    .context("Pixels surface missing")?
                    .render()
                    .context("Pixels render error")?;

                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => match (code, state) {
                (KeyCode::KeyP, ElementState::Pressed) if !repeat => {
                    self.runner.toggle_pause();
                    self.update_title();
                }
                (KeyCode::Backspace, ElementState::Pressed) if !repeat => {
                    self.reset();
                }
                (KeyCode::Tab, ElementState::Pressed) if !repeat => {
                    self.cycle_speed();
                }
                (KeyCode::PageDown, ElementState::Pressed) if !repeat => {
                    self.next_rom();
                }
                _ => {
                    if let Some(key) = KEY_MAP.iter().position(|&k| k == code) {
                        let pressed = state == ElementState::Pressed;
                        self.runner.set_key(u4::new(key as u8), pressed);
                    }
                }
            },

            _ => (),
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.try_resumed(event_loop) {
            self.exit_result = Err(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Err(e) = self.try_window_event(event_loop, event) {
            self.exit_result = Err(e);
            event_loop.exit();
        }
    }
}

/// CHIP-8 emulator written in Rust.
///
/// Keys 1-4, Q-R, A-F, Z-V map to CHIP-8 keys.
/// P pauses, Backspace reloads the ROM, Tab cycles the speed,
/// PageDown opens the next ROM of a directory, Escape exits.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Path to a CHIP-8 ROM file, or a directory of .ch8/.rom files
    rom_path: PathBuf,

    /// Which ROM of the directory to start with (sorted by name)
    #[arg(short, long, default_value_t = 0)]
    index: usize,

    /// Instructions executed per 60Hz frame
    #[arg(short, long, value_enum, default_value_t = Speed::Normal)]
    speed: Speed,

    /// Stop on unknown opcodes instead of skipping them
    #[arg(long)]
    strict: bool,

    /// Seed for the random number instruction
    #[arg(long)]
    seed: Option<u64>,
}

/// Writes every display pixel into an RGBA frame.
fn paint_frame(frame: &mut [u8], display: &Display<bool>) {
    for (pxl, on) in frame.chunks_exact_mut(4).zip(display.iter().flatten()) {
        pxl.copy_from_slice(if *on { &PIXEL_ON } else { &PIXEL_OFF });
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(&args).context("Failed to initialize application")?;
    event_loop
        .run_app(&mut app)
        .context("Error occurred during event loop execution")?;

    // Return the result captured during the event loop
    app.exit_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_display_overwrites_stale_frame() {
        let mut frame = vec![0xff; DISPLAY_X * DISPLAY_Y * 4];

        paint_frame(&mut frame, &[[false; DISPLAY_X]; DISPLAY_Y]);

        assert!(frame.chunks_exact(4).all(|pxl| pxl == PIXEL_OFF));
    }

    #[test]
    fn lit_pixels_land_in_row_major_order() {
        let mut frame = vec![0; DISPLAY_X * DISPLAY_Y * 4];
        let mut display = [[false; DISPLAY_X]; DISPLAY_Y];
        display[1][2] = true;

        paint_frame(&mut frame, &display);

        let lit: Vec<usize> = frame
            .chunks_exact(4)
            .enumerate()
            .filter(|(_, pxl)| *pxl == PIXEL_ON)
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(lit, vec![DISPLAY_X + 2]);
    }
}
