use clap::ValueEnum;
use glam::Vec3;

use tether::player::PlayerControls;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Pattern {
    /// Stand still.
    Idle,
    /// Walk forward while turning slowly.
    Circle,
    /// Walk the four sides of a square, one second each.
    Square,
    /// Strafe left and right.
    Strafe,
}

/// Produces control state for a bot from elapsed time.
#[derive(Debug, Clone)]
pub struct Script {
    pattern: Pattern,
    jump_every: Option<f32>,
    next_jump: f32,
}

impl Script {
    pub fn new(pattern: Pattern, jump_every: Option<f32>) -> Self {
        Self {
            pattern,
            jump_every: jump_every.filter(|secs| *secs > 0.0),
            next_jump: jump_every.unwrap_or(0.0),
        }
    }

    /// Writes the controls for time `t`. A jump press stays set until the
    /// prediction engine captures and clears it.
    pub fn apply(&mut self, t: f32, controls: &mut PlayerControls) {
        let (direction, yaw) = match self.pattern {
            Pattern::Idle => (Vec3::ZERO, 0.0),
            Pattern::Circle => (Vec3::Z, t * 0.8),
            Pattern::Square => {
                let side = (t as u32 % 4) as f32;
                (Vec3::Z, side * std::f32::consts::FRAC_PI_2)
            }
            Pattern::Strafe => {
                let sign = if (t * 0.5).fract() < 0.5 { 1.0 } else { -1.0 };
                (Vec3::X * sign, 0.0)
            }
        };
        controls.direction = direction;
        controls.yaw = yaw;
        controls.sprint = false;

        if let Some(every) = self.jump_every
            && t >= self.next_jump
        {
            controls.jump = true;
            self.next_jump = t + every;
        }
    }
}
