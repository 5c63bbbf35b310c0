//! Input sampling.
//!
//! In a real client this would integrate with windowing and raw
//! mouse/keyboard. This scaffold focuses on producing a deterministic
//! movement vector per frame for the prediction engine to consume.

use netcode_shared::math::Vec3;

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub forward: f32,
    pub right: f32,
    pub jump: bool,
}

impl InputState {
    pub fn movement_vector(self) -> Vec3 {
        Vec3::new(self.forward, self.right, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_vector_ignores_vertical_axis() {
        let input = InputState {
            forward: 1.0,
            right: -1.0,
            jump: true,
        };
        assert_eq!(input.movement_vector(), Vec3::new(1.0, -1.0, 0.0));
    }
}
