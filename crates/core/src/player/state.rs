use glam::Vec3;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub grounded: bool,
    pub coyote_time: f32,
    pub jump_consumed: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            grounded: true,
            coyote_time: 0.0,
            jump_consumed: false,
        }
    }
}

impl PlayerState {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            yaw,
            ..Self::default()
        }
    }

    /// Moves the player without any momentum.
    pub fn teleport(&mut self, position: Vec3) {
        self.position = position;
        self.velocity = Vec3::ZERO;
        self.grounded = position.y <= 0.0;
    }
}
