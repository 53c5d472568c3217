// Tracks the subset of keyboard/mouse state the free-fly camera needs.
//
// Austin Shafer - 2020

use winit::event::ElementState;
use winit::keyboard::{Key, NamedKey};

#[derive(Default)]
pub struct InputState {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub sprint: bool,
    pub captured: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_key(&mut self, key: &Key, state: ElementState) {
        let pressed = state == ElementState::Pressed;
        match key {
            Key::Character(c) => match c.as_str() {
                "w" | "W" => self.forward = pressed,
                "s" | "S" => self.back = pressed,
                "a" | "A" => self.left = pressed,
                "d" | "D" => self.right = pressed,
                _ => {}
            },
            Key::Named(NamedKey::Space) => self.up = pressed,
            Key::Named(NamedKey::Control) => self.down = pressed,
            Key::Named(NamedKey::Shift) => self.sprint = pressed,
            Key::Named(NamedKey::Escape) => {
                if pressed {
                    self.captured = false;
                }
            }
            Key::Named(NamedKey::Alt) => {
                if pressed {
                    self.captured = false;
                }
            }
            _ => {}
        }
    }
}
