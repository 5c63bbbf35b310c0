//! The networked-entity contract.
//!
//! The core never depends on a concrete player/actor type — only on this
//! capability set. Game-specific movement, gravity, and ground collision are
//! the implementor's problem; the core only calls through the interface.

use crate::math::Vec3;

/// Numeric identity of a networked entity, stable for the session's lifetime.
pub type EntityId = u32;

/// Capability set the prediction, reconciliation, and interpolation engines
/// drive an entity through. A concrete implementation holds both a
/// simulation position (the authoritative target) and a render position
/// (what the view draws); the two diverge only while a visual blend is in
/// progress.
pub trait NetworkedEntity: Send + Sync {
    fn get_id(&self) -> EntityId;

    fn get_move_speed(&self) -> f32;

    /// Applies a single frame of movement input to the simulation position.
    fn move_by(&mut self, direction: Vec3);

    /// Game-specific jump impulse. A no-op for entities that can't jump.
    fn jump(&mut self);

    /// Advances any in-flight physics (gravity integration, ground
    /// collision, visual blend easing) by one step.
    fn update(&mut self);

    fn get_position(&self) -> Vec3;
    fn set_position(&mut self, position: Vec3);

    /// The position the view should draw, which may still be easing toward
    /// `get_position()` after a reconciliation snap.
    fn get_render_position(&self) -> Vec3;

    /// Instantly overwrites simulation state without touching the render
    /// position. Used by reconciliation to snap to the server's authority
    /// before replaying buffered inputs.
    fn snap_simulation_state(&mut self, position: Vec3, is_jumping: bool, velocity_y: f32);

    /// Starts a visual blend from the current render position toward the
    /// (now corrected) simulation position. `update()` eases it in over
    /// subsequent frames.
    fn initiate_visual_blend(&mut self);

    fn is_jumping(&self) -> bool;
}

/// Reference player entity: a flat position/velocity pair plus whatever
/// bookkeeping a visual blend needs.
#[derive(Debug, Clone, Copy)]
pub struct Player {
    id: EntityId,
    move_speed: f32,
    simulation_position: Vec3,
    render_position: Vec3,
    velocity_y: f32,
    jumping: bool,
    blending: bool,
}

/// Render position eases toward the simulation position by this fraction of
/// the remaining distance each `update()` call, matching the advisory
/// smoothing factor named in the reconciliation engine's configuration.
const VISUAL_BLEND_FACTOR: f32 = 0.2;

/// Blend is considered complete once the remaining distance drops under this
/// threshold, so render and simulation position compare equal under ε.
const BLEND_SNAP_EPSILON: f32 = crate::math::EPSILON * 10.0;

impl Player {
    pub fn new(id: EntityId, move_speed: f32, position: Vec3) -> Self {
        Self {
            id,
            move_speed,
            simulation_position: position,
            render_position: position,
            velocity_y: 0.0,
            jumping: false,
            blending: false,
        }
    }

    pub fn velocity_y(&self) -> f32 {
        self.velocity_y
    }
}

impl NetworkedEntity for Player {
    fn get_id(&self) -> EntityId {
        self.id
    }

    fn get_move_speed(&self) -> f32 {
        self.move_speed
    }

    fn move_by(&mut self, direction: Vec3) {
        self.simulation_position += direction * self.move_speed;
    }

    fn jump(&mut self) {
        self.jumping = true;
    }

    fn update(&mut self) {
        if self.blending {
            let delta = self.simulation_position - self.render_position;
            if delta.length() <= BLEND_SNAP_EPSILON {
                self.render_position = self.simulation_position;
                self.blending = false;
            } else {
                self.render_position += delta * VISUAL_BLEND_FACTOR;
            }
        } else {
            self.render_position = self.simulation_position;
        }
    }

    fn get_position(&self) -> Vec3 {
        self.simulation_position
    }

    fn set_position(&mut self, position: Vec3) {
        self.simulation_position = position;
        if !self.blending {
            self.render_position = position;
        }
    }

    fn get_render_position(&self) -> Vec3 {
        self.render_position
    }

    fn snap_simulation_state(&mut self, position: Vec3, is_jumping: bool, velocity_y: f32) {
        self.simulation_position = position;
        self.jumping = is_jumping;
        self.velocity_y = velocity_y;
    }

    fn initiate_visual_blend(&mut self) {
        self.blending = true;
    }

    fn is_jumping(&self) -> bool {
        self.jumping
    }
}
