// src/platform.rs
//! Window and event source behind the frame loop.
//!
//! [`WinitPlatform`] drives a winit event loop with `pump_app_events`, so the engine keeps
//! owning the loop instead of handing control to winit. [`HeadlessPlatform`] is a scriptable
//! stand-in with no window.

use std::sync::Arc;
use std::time::Duration;

use glam::{UVec2, Vec2};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::input_system::{ButtonState, InputSystem, Key, MouseButton};
use crate::logging::CORE;

pub trait Platform {
    /// Pumps pending events. Returns false once the window should close.
    fn do_events(&mut self) -> bool;

    fn window_size(&self) -> UVec2;

    /// The size from the last resize not yet consumed.
    fn take_resize(&mut self) -> Option<UVec2>;

    fn key_state(&self, key: Key) -> ButtonState;

    fn mouse_button_state(&self, button: MouseButton) -> ButtonState;

    fn mouse_position(&self) -> Vec2;

    fn input(&self) -> &InputSystem;

    fn request_close(&mut self);

    /// The native window, when there is one.
    fn window(&self) -> Option<Arc<Window>> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Headless
// ─────────────────────────────────────────────────────────────────────────────

/// No window. Tests script input, resizes and close requests directly.
#[derive(Default)]
pub struct HeadlessPlatform {
    size: UVec2,
    pending_resize: Option<UVec2>,
    close_requested: bool,
    input: InputSystem,
}

impl HeadlessPlatform {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: UVec2::new(width, height),
            ..Default::default()
        }
    }

    /// Takes effect for the window size immediately; reported once through `take_resize`.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = UVec2::new(width, height);
        self.pending_resize = Some(self.size);
    }

    pub fn input_mut(&mut self) -> &mut InputSystem {
        &mut self.input
    }
}

impl Platform for HeadlessPlatform {
    fn do_events(&mut self) -> bool {
        self.input.update();
        !self.close_requested
    }

    fn window_size(&self) -> UVec2 {
        self.size
    }

    fn take_resize(&mut self) -> Option<UVec2> {
        self.pending_resize.take()
    }

    fn key_state(&self, key: Key) -> ButtonState {
        self.input.key_state(key)
    }

    fn mouse_button_state(&self, button: MouseButton) -> ButtonState {
        self.input.mouse_button_state(button)
    }

    fn mouse_position(&self) -> Vec2 {
        self.input.mouse_position()
    }

    fn input(&self) -> &InputSystem {
        &self.input
    }

    fn request_close(&mut self) {
        self.close_requested = true;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// winit
// ─────────────────────────────────────────────────────────────────────────────

struct WinitApp {
    attributes: WindowAttributes,
    window: Option<Arc<Window>>,
    size: UVec2,
    pending_resize: Option<UVec2>,
    close_requested: bool,
    input: InputSystem,
    create_error: Option<String>,
}

impl ApplicationHandler for WinitApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                self.size = UVec2::new(size.width, size.height);
                self.window = Some(Arc::new(window));
            }
            Err(e) => {
                log::error!(target: CORE, "window creation failed: {}", e);
                self.create_error = Some(e.to_string());
                self.close_requested = true;
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.close_requested = true,
            WindowEvent::Resized(size) => {
                self.size = UVec2::new(size.width, size.height);
                self.pending_resize = Some(self.size);
            }
            WindowEvent::Focused(false) => self.input.release_all(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    if let Some(key) = map_key(code) {
                        self.input.raw_key_event(key, event.state == ElementState::Pressed);
                    }
                }
                if event.state == ElementState::Pressed {
                    if let Some(text) = &event.text {
                        self.input.raw_text(text);
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.input.raw_pointer_move(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    winit::event::MouseButton::Left => MouseButton::Left,
                    winit::event::MouseButton::Right => MouseButton::Right,
                    winit::event::MouseButton::Middle => MouseButton::Middle,
                    winit::event::MouseButton::Back => MouseButton::Other(3),
                    winit::event::MouseButton::Forward => MouseButton::Other(4),
                    winit::event::MouseButton::Other(b) => MouseButton::Other(b),
                };
                self.input.raw_mouse_event(button, state == ElementState::Pressed);
            }
            WindowEvent::MouseWheel { delta, .. } => match delta {
                MouseScrollDelta::LineDelta(x, y) => self.input.raw_scroll(x, y),
                MouseScrollDelta::PixelDelta(p) => self.input.raw_scroll(p.x as f32, p.y as f32),
            },
            _ => {}
        }
    }
}

pub struct WinitPlatform {
    event_loop: EventLoop<()>,
    app: WinitApp,
}

impl WinitPlatform {
    /// Opens the window described by `config`.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().map_err(|e| Error::Platform(e.to_string()))?;
        let mut attributes = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);
        if config.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let mut app = WinitApp {
            attributes,
            window: None,
            size: UVec2::new(config.width, config.height),
            pending_resize: None,
            close_requested: false,
            input: InputSystem::new(),
            create_error: None,
        };

        // the window is created on the first resume
        for _ in 0..8 {
            if app.window.is_some() || app.create_error.is_some() {
                break;
            }
            if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut app) {
                return Err(Error::Platform(format!("event loop exited with code {code}")));
            }
        }
        if let Some(e) = app.create_error.take() {
            return Err(Error::Platform(e));
        }
        if app.window.is_none() {
            return Err(Error::Platform("window was not created".to_string()));
        }
        log::info!(target: CORE, "window '{}' opened at {}x{}", config.title, app.size.x, app.size.y);
        Ok(Self { event_loop, app })
    }
}

impl Platform for WinitPlatform {
    fn do_events(&mut self) -> bool {
        if let PumpStatus::Exit(_) = self.event_loop.pump_app_events(Some(Duration::ZERO), &mut self.app) {
            self.app.close_requested = true;
        }
        self.app.input.update();
        !self.app.close_requested
    }

    fn window_size(&self) -> UVec2 {
        self.app.size
    }

    fn take_resize(&mut self) -> Option<UVec2> {
        self.app.pending_resize.take()
    }

    fn key_state(&self, key: Key) -> ButtonState {
        self.app.input.key_state(key)
    }

    fn mouse_button_state(&self, button: MouseButton) -> ButtonState {
        self.app.input.mouse_button_state(button)
    }

    fn mouse_position(&self) -> Vec2 {
        self.app.input.mouse_position()
    }

    fn input(&self) -> &InputSystem {
        &self.app.input
    }

    fn request_close(&mut self) {
        self.app.close_requested = true;
    }

    fn window(&self) -> Option<Arc<Window>> {
        self.app.window.clone()
    }
}

fn map_key(code: KeyCode) -> Option<Key> {
    Some(match code {
        KeyCode::KeyA => Key::A,
        KeyCode::KeyB => Key::B,
        KeyCode::KeyC => Key::C,
        KeyCode::KeyD => Key::D,
        KeyCode::KeyE => Key::E,
        KeyCode::KeyF => Key::F,
        KeyCode::KeyG => Key::G,
        KeyCode::KeyH => Key::H,
        KeyCode::KeyI => Key::I,
        KeyCode::KeyJ => Key::J,
        KeyCode::KeyK => Key::K,
        KeyCode::KeyL => Key::L,
        KeyCode::KeyM => Key::M,
        KeyCode::KeyN => Key::N,
        KeyCode::KeyO => Key::O,
        KeyCode::KeyP => Key::P,
        KeyCode::KeyQ => Key::Q,
        KeyCode::KeyR => Key::R,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyT => Key::T,
        KeyCode::KeyU => Key::U,
        KeyCode::KeyV => Key::V,
        KeyCode::KeyW => Key::W,
        KeyCode::KeyX => Key::X,
        KeyCode::KeyY => Key::Y,
        KeyCode::KeyZ => Key::Z,
        KeyCode::Digit0 => Key::Num0,
        KeyCode::Digit1 => Key::Num1,
        KeyCode::Digit2 => Key::Num2,
        KeyCode::Digit3 => Key::Num3,
        KeyCode::Digit4 => Key::Num4,
        KeyCode::Digit5 => Key::Num5,
        KeyCode::Digit6 => Key::Num6,
        KeyCode::Digit7 => Key::Num7,
        KeyCode::Digit8 => Key::Num8,
        KeyCode::Digit9 => Key::Num9,
        KeyCode::F1 => Key::F1,
        KeyCode::F2 => Key::F2,
        KeyCode::F3 => Key::F3,
        KeyCode::F4 => Key::F4,
        KeyCode::F5 => Key::F5,
        KeyCode::F6 => Key::F6,
        KeyCode::F7 => Key::F7,
        KeyCode::F8 => Key::F8,
        KeyCode::F9 => Key::F9,
        KeyCode::F10 => Key::F10,
        KeyCode::F11 => Key::F11,
        KeyCode::F12 => Key::F12,
        KeyCode::ArrowUp => Key::Up,
        KeyCode::ArrowDown => Key::Down,
        KeyCode::ArrowLeft => Key::Left,
        KeyCode::ArrowRight => Key::Right,
        KeyCode::Space => Key::Space,
        KeyCode::Enter => Key::Enter,
        KeyCode::Escape => Key::Escape,
        KeyCode::Tab => Key::Tab,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Delete => Key::Delete,
        KeyCode::Insert => Key::Insert,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::ShiftLeft => Key::LeftShift,
        KeyCode::ShiftRight => Key::RightShift,
        KeyCode::ControlLeft => Key::LeftControl,
        KeyCode::ControlRight => Key::RightControl,
        KeyCode::AltLeft => Key::LeftAlt,
        KeyCode::AltRight => Key::RightAlt,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_scripts_resize_and_close() {
        let mut platform = HeadlessPlatform::new(320, 240);
        assert!(platform.do_events());
        assert_eq!(platform.take_resize(), None);

        platform.resize(640, 480);
        assert_eq!(platform.window_size(), UVec2::new(640, 480));
        assert_eq!(platform.take_resize(), Some(UVec2::new(640, 480)));
        assert_eq!(platform.take_resize(), None);

        platform.input_mut().raw_key_event(Key::Escape, true);
        assert!(platform.do_events());
        assert_eq!(platform.key_state(Key::Escape), ButtonState::Down);

        platform.request_close();
        assert!(!platform.do_events());
        assert!(platform.window().is_none());
    }

    #[test]
    fn winit_key_mapping() {
        assert_eq!(map_key(KeyCode::KeyQ), Some(Key::Q));
        assert_eq!(map_key(KeyCode::ArrowLeft), Some(Key::Left));
        assert_eq!(map_key(KeyCode::NumpadAdd), None);
    }
}
