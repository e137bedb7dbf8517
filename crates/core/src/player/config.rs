/// Movement tuning shared by the server and every predicting client. Both
/// sides must use the same values or every tick mispredicts.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    pub move_speed_ground: f32,
    pub move_speed_air: f32,
    pub sprint_factor: f32,

    pub accelerate_ground: f32,
    pub decelerate_ground: f32,

    pub accelerate_air: f32,
    pub decelerate_air: f32,

    pub gravity: f32,
    pub gravity_fall: f32,
    pub gravity_fall_vel_start: f32,
    pub gravity_fall_vel_span: f32,

    pub max_fall_speed: f32,

    pub jump_power: f32,

    pub coyote_time: f32,

    /// Players are kept inside `[-extent, extent]` on x and z.
    pub arena_extent: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            move_speed_ground: 9.0,
            move_speed_air: 7.0,
            sprint_factor: 1.5,

            accelerate_ground: 7.0,
            decelerate_ground: 25.0,

            accelerate_air: 2.0,
            decelerate_air: 0.0,

            gravity: 9.8,
            gravity_fall: 16.0,
            gravity_fall_vel_start: 8.0,
            gravity_fall_vel_span: 9.0,

            max_fall_speed: 70.0,

            jump_power: 6.0,

            coyote_time: 0.05,

            arena_extent: 50.0,
        }
    }
}
