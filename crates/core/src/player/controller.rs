use glam::Vec3;

use crate::input::{InputFrame, InputValue};

use super::{PlayerConfig, PlayerState};

pub const INPUT_MOVE: usize = 0;
pub const INPUT_YAW: usize = 1;
pub const INPUT_JUMP: usize = 2;
pub const INPUT_SPRINT: usize = 3;

/// Control state sampled by the owning client each tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerControls {
    /// Local direction: x strafes, z moves forward.
    pub direction: Vec3,
    pub yaw: f32,
    /// Cleared once captured.
    pub jump: bool,
    pub sprint: bool,
}

impl PlayerControls {
    pub fn to_frame(&self, timestamp: f32) -> InputFrame {
        InputFrame::new(timestamp)
            .with(InputValue::Vector(self.direction))
            .with(InputValue::Float(self.yaw))
            .with(InputValue::Trigger(self.jump))
            .with(InputValue::Bool(self.sprint))
    }
}

struct MovementInput {
    world_direction: Vec3,
    is_active: bool,
    wants_jump: bool,
    sprint: bool,
    yaw: f32,
}

impl MovementInput {
    fn from_frame(frame: &InputFrame) -> Self {
        let local = frame.vector(INPUT_MOVE).unwrap_or(Vec3::ZERO);
        let yaw = frame.float(INPUT_YAW).unwrap_or(0.0);
        let world_direction = local_to_world_direction(Vec3::new(local.x, 0.0, local.z), yaw);
        Self {
            world_direction,
            is_active: world_direction.length_squared() > 0.001,
            wants_jump: frame.flag(INPUT_JUMP).unwrap_or(false),
            sprint: frame.flag(INPUT_SPRINT).unwrap_or(false),
            yaw,
        }
    }
}

fn local_to_world_direction(local: Vec3, yaw: f32) -> Vec3 {
    if local.length_squared() < 0.001 {
        return Vec3::ZERO;
    }

    let normalized = local.normalize();
    let (sin_yaw, cos_yaw) = yaw.sin_cos();

    Vec3::new(
        normalized.x * cos_yaw + normalized.z * sin_yaw,
        0.0,
        -normalized.x * sin_yaw + normalized.z * cos_yaw,
    )
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Kinematic movement on a flat floor at y = 0 inside a square arena.
#[derive(Debug, Clone, Default)]
pub struct PlayerController {
    config: PlayerConfig,
}

impl PlayerController {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn process(&self, frame: &InputFrame, state: &mut PlayerState, dt: f32) {
        let input = MovementInput::from_frame(frame);
        let grounded = state.grounded;

        let velocity = self.compute_velocity(state, &input, grounded, dt);
        let mut position = state.position + velocity * dt;
        let mut velocity = velocity;

        state.grounded = position.y <= 0.0;
        if state.grounded {
            position.y = 0.0;
            velocity.y = velocity.y.max(0.0);
        }

        let extent = self.config.arena_extent;
        if position.x.abs() > extent {
            position.x = position.x.clamp(-extent, extent);
            velocity.x = 0.0;
        }
        if position.z.abs() > extent {
            position.z = position.z.clamp(-extent, extent);
            velocity.z = 0.0;
        }

        state.position = position;
        state.velocity = velocity;
        state.yaw = input.yaw;
    }

    fn compute_velocity(&self, state: &mut PlayerState, input: &MovementInput, grounded: bool, dt: f32) -> Vec3 {
        let mut velocity = state.velocity;

        if !grounded {
            velocity = self.apply_gravity(velocity, dt);
        }

        let can_jump = grounded || state.coyote_time > 0.0;
        if input.wants_jump && can_jump && !state.jump_consumed {
            velocity.y = self.config.jump_power;
            state.jump_consumed = true;
            state.coyote_time = 0.0;
        }

        if !input.wants_jump {
            state.jump_consumed = false;
        }

        if grounded {
            state.coyote_time = self.config.coyote_time;
        } else {
            state.coyote_time = (state.coyote_time - dt).max(0.0);
        }

        let horizontal = self.compute_horizontal_velocity(Vec3::new(velocity.x, 0.0, velocity.z), input, grounded, dt);
        Vec3::new(horizontal.x, velocity.y, horizontal.z)
    }

    fn apply_gravity(&self, mut velocity: Vec3, dt: f32) -> Vec3 {
        let fall_blend = ((velocity.y.abs() - self.config.gravity_fall_vel_start) / self.config.gravity_fall_vel_span)
            .clamp(0.0, 1.0);
        let gravity = lerp(self.config.gravity_fall, self.config.gravity, fall_blend);
        velocity.y = (velocity.y - gravity * dt).max(-self.config.max_fall_speed);
        velocity
    }

    fn compute_horizontal_velocity(&self, initial: Vec3, input: &MovementInput, grounded: bool, dt: f32) -> Vec3 {
        let (acceleration, deceleration, mut max_speed) = if grounded {
            (
                self.config.accelerate_ground,
                self.config.decelerate_ground,
                self.config.move_speed_ground,
            )
        } else {
            (
                self.config.accelerate_air,
                self.config.decelerate_air,
                self.config.move_speed_air,
            )
        };
        if input.sprint {
            max_speed *= self.config.sprint_factor;
        }

        if input.is_active {
            let blend = (acceleration * dt).min(1.0);
            return initial.lerp(input.world_direction * max_speed, blend);
        }

        let speed = initial.length();
        if speed < 0.0001 {
            return Vec3::ZERO;
        }
        let decel_amount = (deceleration * dt).min(speed);
        initial - initial.normalize() * decel_amount
    }
}
