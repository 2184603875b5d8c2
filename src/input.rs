//! Input port state.
//!
//! The host keeps a flat table of per-port joypad state that cores poll
//! through the `input_state` callback. Out-of-range queries answer 0, the
//! neutral value, so a misbehaving core cannot read past the table.

use bytemuck::{Pod, Zeroable};

/// Maximum number of input ports a session exposes.
pub const MAX_PORTS: usize = 8;
/// Button slots per joypad.
pub const JOYPAD_IDS: usize = 16;

/// Device class codes, as passed to `set_device` and `input_state`.
pub const DEVICE_NONE: u32 = 0;
pub const DEVICE_JOYPAD: u32 = 1;
pub const DEVICE_MOUSE: u32 = 2;
pub const DEVICE_KEYBOARD: u32 = 3;
pub const DEVICE_LIGHTGUN: u32 = 4;
pub const DEVICE_ANALOG: u32 = 5;

/// One port's worth of joypad state: digital buttons plus two analog
/// sticks with two axes each.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct JoypadState {
    pub buttons: [i16; JOYPAD_IDS],
    pub axes: [[i16; 2]; 2],
}

/// Input state for every port of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputTable {
    pads: [JoypadState; MAX_PORTS],
}

impl InputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every port.
    pub fn clear(&mut self) {
        self.pads = [JoypadState::zeroed(); MAX_PORTS];
    }

    /// Set one digital button. Pressed buttons read as 1.
    pub fn set_button(&mut self, port: usize, id: usize, pressed: bool) {
        if port < MAX_PORTS && id < JOYPAD_IDS {
            self.pads[port].buttons[id] = i16::from(pressed);
        }
    }

    /// Set one analog axis, full range of `i16`.
    pub fn set_axis(&mut self, port: usize, stick: usize, axis: usize, value: i16) {
        if port < MAX_PORTS && stick < 2 && axis < 2 {
            self.pads[port].axes[stick][axis] = value;
        }
    }

    /// Answer an `input_state` poll from a core.
    pub fn state(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        let Some(pad) = self.pads.get(port as usize) else {
            return 0;
        };
        match device {
            DEVICE_JOYPAD => pad
                .buttons
                .get(id as usize)
                .copied()
                .unwrap_or(0),
            DEVICE_ANALOG => match (index as usize, id as usize) {
                (stick @ 0..=1, axis @ 0..=1) => pad.axes[stick][axis],
                _ => 0,
            },
            _ => 0,
        }
    }
}
