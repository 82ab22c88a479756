// src/input_system.rs
// Polled input state for the frame loop.
// Platforms feed raw events in; the game reads per-frame button states out.

use std::collections::HashMap;

use glam::Vec2;

#[rustfmt::skip]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    Up, Down, Left, Right,
    Space, Enter, Escape, Tab, Backspace, Delete, Insert, Home, End, PageUp, PageDown,
    LeftShift, RightShift, LeftControl, RightControl, LeftAlt, RightAlt,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

/// State of a button as seen by one frame.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum ButtonState {
    #[default]
    Free,
    /// Went down this frame.
    Down,
    Hold,
    /// Went up this frame.
    Up,
}

impl ButtonState {
    pub fn is_pressed(self) -> bool {
        matches!(self, ButtonState::Down | ButtonState::Hold)
    }
}

// per-button record; edges are stamped with the frame that will observe them
#[derive(Copy, Clone, Debug)]
struct RawButton {
    down: bool,
    last_down_frame: u64,
    last_up_frame: u64,
}

impl Default for RawButton {
    fn default() -> Self {
        Self {
            down: false,
            last_down_frame: u64::MAX,
            last_up_frame: u64::MAX,
        }
    }
}

impl RawButton {
    fn set(&mut self, pressed: bool, frame: u64) {
        if pressed && !self.down {
            self.down = true;
            self.last_down_frame = frame;
        } else if !pressed && self.down {
            self.down = false;
            self.last_up_frame = frame;
        }
    }

    fn state(&self, frame: u64) -> ButtonState {
        match (self.down, self.last_down_frame == frame, self.last_up_frame == frame) {
            (true, true, _) => ButtonState::Down,
            (true, false, _) => ButtonState::Hold,
            (false, _, true) => ButtonState::Up,
            (false, _, false) => ButtonState::Free,
        }
    }
}

#[derive(Default)]
pub struct InputSystem {
    frame: u64,
    keys: HashMap<Key, RawButton>,
    mouse: HashMap<MouseButton, RawButton>,
    pointer: Vec2,
    pointer_prev: Vec2,
    pointer_delta: Vec2,
    // accumulates between updates, published by update()
    scroll_pending: Vec2,
    scroll: Vec2,
    text: String,
}

impl InputSystem {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------- Raw updates ----------------
    // Events arriving between two update() calls belong to the frame the second one opens.

    pub fn raw_key_event(&mut self, key: Key, pressed: bool) {
        let frame = self.frame + 1;
        self.keys.entry(key).or_default().set(pressed, frame);
    }

    pub fn raw_mouse_event(&mut self, button: MouseButton, pressed: bool) {
        let frame = self.frame + 1;
        self.mouse.entry(button).or_default().set(pressed, frame);
    }

    pub fn raw_pointer_move(&mut self, x: f32, y: f32) {
        self.pointer = Vec2::new(x, y);
    }

    pub fn raw_scroll(&mut self, dx: f32, dy: f32) {
        self.scroll_pending += Vec2::new(dx, dy);
    }

    pub fn raw_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Advances to the next frame. Call once per frame after feeding events.
    pub fn update(&mut self) {
        self.frame = self.frame.wrapping_add(1);
        self.pointer_delta = self.pointer - self.pointer_prev;
        self.pointer_prev = self.pointer;
        self.scroll = std::mem::take(&mut self.scroll_pending);
    }

    // ---------------- Queries ----------------

    pub fn key_state(&self, key: Key) -> ButtonState {
        self.keys.get(&key).map_or(ButtonState::Free, |b| b.state(self.frame))
    }

    pub fn mouse_button_state(&self, button: MouseButton) -> ButtonState {
        self.mouse.get(&button).map_or(ButtonState::Free, |b| b.state(self.frame))
    }

    pub fn mouse_position(&self) -> Vec2 {
        self.pointer
    }

    pub fn mouse_delta(&self) -> Vec2 {
        self.pointer_delta
    }

    pub fn mouse_wheel(&self) -> Vec2 {
        self.scroll
    }

    /// Text typed since the last call.
    pub fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Releases everything, e.g. when the window loses focus.
    pub fn release_all(&mut self) {
        let frame = self.frame + 1;
        for b in self.keys.values_mut().chain(self.mouse.values_mut()) {
            b.set(false, frame);
        }
    }
}
