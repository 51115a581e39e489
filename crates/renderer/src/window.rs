use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowBuilder};

use tracing::{debug, error, info, warn};

use crate::backend::Viewport;
use crate::capture::{BoxedFrameSink, EncoderSink};
use crate::compile::FragmentSource;
use crate::error::WindowInitError;
use crate::gpu::GpuBackend;
use crate::reload::{reload_channel, ReloadController, ReloadHandle, ReloadReason, SourceWatcher};
use crate::render_loop::{FrameLoop, FrameOutcome, LoopConfig, LoopState};
use crate::runtime::{
    flip_pointer_y, BoxedTimeSource, FixedStepTimeSource, InputSnapshot, SystemTimeSource,
};
use crate::types::{RendererConfig, WindowSize};

/// Everything the event loop closure needs between callbacks.
struct WindowState {
    window: Arc<Window>,
    frame_loop: FrameLoop<GpuBackend>,
    mouse: MouseState,
    keyboard: KeyboardState,
    reload: ReloadHandle,
    /// Capture streams have a fixed frame size, so the viewport stops tracking the window.
    pinned_viewport: Option<Viewport>,
    _watcher: Option<SourceWatcher>,
}

impl WindowState {
    fn snapshot(&self) -> InputSnapshot {
        let viewport = self.pinned_viewport.unwrap_or_else(|| {
            let size = self.window.inner_size();
            Viewport::new(size.width, size.height)
        });
        InputSnapshot {
            viewport,
            pointer: self.mouse.as_uniform(viewport.height),
            key: self.keyboard.as_uniform(),
        }
    }

    fn handle_key(&mut self, event: &KeyEvent) -> KeyAction {
        if let Some(code) = ascii_from_key(&event.logical_key) {
            self.keyboard.handle_key(code, event.state, event.repeat);
        }
        if event.state != ElementState::Pressed || event.repeat {
            return KeyAction::None;
        }
        match event.logical_key {
            Key::Named(NamedKey::Escape) => KeyAction::Close,
            Key::Named(NamedKey::F5) => {
                info!("manual reload requested");
                let _ = self.reload.request(ReloadReason::Manual);
                KeyAction::None
            }
            _ => KeyAction::None,
        }
    }
}

enum KeyAction {
    None,
    Close,
}

/// Opens the window and drives the frame loop until it closes.
///
/// `fragment` has already been read from `config.shader_source`.
pub(crate) fn run_window(config: &RendererConfig, fragment: FragmentSource) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| WindowInitError::EventLoop(err.to_string()))?;

    let capturing = config.capture.is_some();
    let title = match config.shader_source.file_name() {
        Some(name) => format!("shaderun - {}", name.to_string_lossy()),
        None => "shaderun".to_string(),
    };
    let mut builder = WindowBuilder::new()
        .with_title(title)
        .with_resizable(!capturing);
    builder = match config.window_size {
        WindowSize::Windowed { width, height } => {
            builder.with_inner_size(PhysicalSize::new(width, height))
        }
        WindowSize::Fullscreen => {
            builder.with_fullscreen(Some(Fullscreen::Borderless(event_loop.primary_monitor())))
        }
    };
    let window = builder
        .build(&event_loop)
        .map_err(|err| WindowInitError::Window(err.to_string()))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let mut backend = GpuBackend::new(window.clone(), size, config.color_space, capturing)?;
    let viewport = Viewport::new(size.width.max(1), size.height.max(1));

    let sink: Option<BoxedFrameSink> = match config.capture.as_ref() {
        Some(capture) => {
            backend.enable_capture()?;
            let sink = EncoderSink::spawn(capture, viewport)?;
            Some(Box::new(sink))
        }
        None => None,
    };

    let time_source: BoxedTimeSource = if config.fixed_step {
        Box::new(FixedStepTimeSource::from_fps(config.fixed_step_fps()))
    } else {
        Box::new(SystemTimeSource::new())
    };

    let (reload, requests) = reload_channel();
    let watcher = if config.watch {
        match SourceWatcher::spawn(&config.shader_source, reload.clone()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(error = %err, "file watching unavailable; press F5 to reload");
                None
            }
        }
    } else {
        debug!("file watching disabled");
        None
    };

    let frame_loop = FrameLoop::start(
        backend,
        config.shader_source.clone(),
        fragment,
        LoopConfig {
            time_source,
            sink,
            max_frames: config.max_frames,
        },
        ReloadController::new(requests),
    )
    .context("failed to build shader program")?;

    let mut state = WindowState {
        window,
        frame_loop,
        mouse: MouseState::default(),
        keyboard: KeyboardState::default(),
        reload,
        pinned_viewport: capturing.then_some(viewport),
        _watcher: watcher,
    };
    state.window.request_redraw();

    let mut outcome: Result<()> = Ok(());
    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == state.window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                state.frame_loop.request_close();
                elwt.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let KeyAction::Close = state.handle_key(&event) {
                    state.frame_loop.request_close();
                    elwt.exit();
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                state.mouse.handle_cursor_moved(position);
            }
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => {
                state.mouse.handle_button(button_state);
            }
            WindowEvent::Resized(new_size) => {
                tracing::trace!(width = new_size.width, height = new_size.height, "window resized");
                state.window.request_redraw();
            }
            WindowEvent::RedrawRequested => {
                let input = state.snapshot();
                match state.frame_loop.iterate(&input) {
                    Ok(FrameOutcome::Rendered { .. }) => state.keyboard.end_frame(),
                    Ok(FrameOutcome::Skipped) => {}
                    Ok(FrameOutcome::Closed) => elwt.exit(),
                    Err(err) => {
                        error!(error = %err, "render loop stopped");
                        outcome = Err(anyhow!(err));
                        elwt.exit();
                    }
                }
                if state.frame_loop.state() == LoopState::Closing {
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            state.window.request_redraw();
            elwt.set_control_flow(ControlFlow::Wait);
        }
        Event::LoopExiting => {
            if let Err(err) = state.frame_loop.shutdown() {
                error!(error = %err, "failed to finish capture");
                if outcome.is_ok() {
                    outcome = Err(anyhow!(err));
                }
            }
        }
        _ => {}
    });

    if let Err(err) = run_result {
        return Err(anyhow!("window event loop error: {err}"));
    }

    outcome
}

/// Cursor position plus the point where the current left-button drag began.
#[derive(Default)]
struct MouseState {
    cursor: Option<PhysicalPosition<f64>>,
    drag_origin: Option<PhysicalPosition<f64>>,
    button_down: bool,
}

impl MouseState {
    fn handle_cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        self.cursor = Some(position);
        if self.button_down && self.drag_origin.is_none() {
            self.drag_origin = Some(position);
        }
    }

    fn handle_button(&mut self, state: ElementState) {
        self.button_down = state == ElementState::Pressed;
        self.drag_origin = if self.button_down { self.cursor } else { None };
    }

    /// `iMouse` for a viewport `height` pixels tall, bottom-left origin.
    fn as_uniform(&self, height: u32) -> [f32; 4] {
        let flip = |point: Option<PhysicalPosition<f64>>| {
            point.map_or([0.0, 0.0], |p| [p.x as f32, flip_pointer_y(p.y, height)])
        };
        let [x, y] = flip(self.cursor);
        let [origin_x, origin_y] = flip(self.drag_origin);
        [x, y, origin_x, origin_y]
    }
}

/// Most recent key as `(code, held, pressed this frame, 0)`.
#[derive(Default)]
struct KeyboardState {
    code: Option<u8>,
    held: bool,
    pulse: bool,
}

impl KeyboardState {
    fn handle_key(&mut self, code: u8, state: ElementState, repeat: bool) -> bool {
        match state {
            ElementState::Pressed => {
                if repeat || (self.held && self.code == Some(code)) {
                    return false;
                }
                self.code = Some(code);
                self.held = true;
                self.pulse = true;
                true
            }
            ElementState::Released => {
                if self.code != Some(code) || !self.held {
                    return false;
                }
                self.held = false;
                true
            }
        }
    }

    /// Clears the one-frame press flag once a frame has used it.
    fn end_frame(&mut self) {
        self.pulse = false;
    }

    fn as_uniform(&self) -> [f32; 4] {
        let flag = |value: bool| if value { 1.0 } else { 0.0 };
        [
            self.code.map(f32::from).unwrap_or(0.0),
            flag(self.held),
            flag(self.pulse),
            0.0,
        ]
    }
}

fn ascii_from_key(key: &Key) -> Option<u8> {
    let code = match key {
        Key::Character(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) if ch.is_ascii() => ch as u8,
                _ => return None,
            }
        }
        Key::Named(NamedKey::Space) => b' ',
        Key::Named(NamedKey::Enter) => b'\n',
        Key::Named(NamedKey::Tab) => b'\t',
        Key::Named(NamedKey::Backspace) => 0x08,
        Key::Named(NamedKey::Escape) => 0x1b,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_reports_cursor_and_held_anchor_bottom_left() {
        let mut mouse = MouseState::default();
        mouse.handle_cursor_moved(PhysicalPosition::new(10.0, 30.0));
        assert_eq!(mouse.as_uniform(100), [10.0, 70.0, 0.0, 0.0]);

        mouse.handle_button(ElementState::Pressed);
        mouse.handle_cursor_moved(PhysicalPosition::new(20.0, 40.0));
        assert_eq!(mouse.as_uniform(100), [20.0, 60.0, 10.0, 70.0]);

        mouse.handle_button(ElementState::Released);
        assert_eq!(mouse.as_uniform(100), [20.0, 60.0, 0.0, 0.0]);
    }

    #[test]
    fn key_press_pulses_for_one_frame() {
        let mut keyboard = KeyboardState::default();
        assert_eq!(keyboard.as_uniform(), [0.0; 4]);

        assert!(keyboard.handle_key(b'a', ElementState::Pressed, false));
        assert_eq!(keyboard.as_uniform(), [97.0, 1.0, 1.0, 0.0]);
        keyboard.end_frame();
        assert_eq!(keyboard.as_uniform(), [97.0, 1.0, 0.0, 0.0]);

        assert!(!keyboard.handle_key(b'a', ElementState::Pressed, true));
        assert!(keyboard.handle_key(b'a', ElementState::Released, false));
        assert_eq!(keyboard.as_uniform(), [97.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn releasing_an_older_key_keeps_the_latest_held() {
        let mut keyboard = KeyboardState::default();
        keyboard.handle_key(b'a', ElementState::Pressed, false);
        keyboard.handle_key(b'b', ElementState::Pressed, false);
        assert!(!keyboard.handle_key(b'a', ElementState::Released, false));
        let key = keyboard.as_uniform();
        assert_eq!((key[0], key[1]), (98.0, 1.0));
    }

    #[test]
    fn ascii_codes_for_named_and_character_keys() {
        assert_eq!(ascii_from_key(&Key::Character("w".into())), Some(b'w'));
        assert_eq!(ascii_from_key(&Key::Character("é".into())), None);
        assert_eq!(ascii_from_key(&Key::Named(NamedKey::Space)), Some(b' '));
        assert_eq!(ascii_from_key(&Key::Named(NamedKey::Escape)), Some(27));
        assert_eq!(ascii_from_key(&Key::Named(NamedKey::F5)), None);
    }
}
