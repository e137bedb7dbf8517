//! Sample gameplay built on the networking core: a predicted player, a
//! pushable crate and a server-driven drone.

mod config;
mod controller;
mod props;
mod state;

pub use config::PlayerConfig;
pub use controller::{INPUT_JUMP, INPUT_MOVE, INPUT_SPRINT, INPUT_YAW, PlayerController, PlayerControls};
pub use props::{CrateBehaviour, DroneBehaviour};
pub use state::PlayerState;

use glam::Vec3;

use crate::directory::{EntityContext, NetBehaviour, PrefabRegistry};
use crate::input::{InputFrame, InputValue, OutputFrame, PoseLayout, PredictedSimulation};
use crate::rpc::{Invocation, MethodTable, RpcError};
use crate::wire::{NetReader, NetWriter, WireError};

pub const PLAYER_PREFAB: &str = "player";
pub const CRATE_PREFAB: &str = "crate";
pub const DRONE_PREFAB: &str = "drone";

pub const OUTPUT_POSITION: usize = 0;
pub const OUTPUT_EULER: usize = 1;
pub const OUTPUT_VELOCITY: usize = 2;
pub const OUTPUT_GROUNDED: usize = 3;
const OUTPUT_COYOTE: usize = 4;
const OUTPUT_JUMP_CONSUMED: usize = 5;

/// Registers every sample prefab. Server and clients call this alike.
pub fn register_prefabs(prefabs: &mut PrefabRegistry) {
    prefabs.register(PLAYER_PREFAB, PlayerBehaviour::default);
    prefabs.register(CRATE_PREFAB, CrateBehaviour::default);
    prefabs.register(DRONE_PREFAB, DroneBehaviour::default);
}

/// Registers the sample RPC methods. The order fixes the method indices,
/// so every peer must go through this same function.
pub fn register_methods(methods: &mut MethodTable) -> Result<(), RpcError> {
    methods.register("Player", "Move", 1)?;
    methods.register("Player", "SetName", 1)?;
    methods.register("Crate", "Push", 1)?;
    methods.register("Crate", "Paint", 1)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct PlayerBehaviour {
    controller: PlayerController,
    state: PlayerState,
    pub controls: PlayerControls,
    name: String,
}

impl PlayerBehaviour {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            controller: PlayerController::new(config),
            ..Self::default()
        }
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn adopt_pose(&mut self, ctx: &EntityContext<'_>) {
        self.state = PlayerState::new(ctx.transform.position, ctx.transform.euler().y);
    }
}

impl NetBehaviour for PlayerBehaviour {
    fn on_server_init(&mut self, ctx: &mut EntityContext<'_>) {
        self.adopt_pose(ctx);
    }

    fn on_client_init(&mut self, ctx: &mut EntityContext<'_>) {
        self.adopt_pose(ctx);
    }

    fn on_owner_init(&mut self, ctx: &mut EntityContext<'_>) {
        log::debug!("Player {} is ours", ctx.instance);
    }

    fn write_spawn(&self, writer: &mut NetWriter) -> Result<(), WireError> {
        writer.write_string(&self.name)
    }

    fn read_spawn(&mut self, reader: &mut NetReader<'_>) -> Result<(), WireError> {
        self.name = reader.read_string()?;
        Ok(())
    }

    fn on_rpc(&mut self, ctx: &mut EntityContext<'_>, call: &Invocation) {
        match call.name() {
            "Move" => {
                if let Some(position) = call.arg(0).and_then(|arg| arg.as_vec3()) {
                    self.state.teleport(position);
                    ctx.transform.position = position;
                }
            }
            "SetName" => {
                if let Some(name) = call.arg(0).and_then(|arg| arg.as_str()) {
                    self.name = name.to_string();
                }
            }
            other => log::warn!("Player {} has no method {other}", ctx.instance),
        }
    }

    fn simulation(&mut self) -> Option<&mut dyn PredictedSimulation> {
        Some(self)
    }
}

impl PredictedSimulation for PlayerBehaviour {
    fn build_input(&mut self, timestamp: f32) -> InputFrame {
        let frame = self.controls.to_frame(timestamp);
        self.controls.jump = false;
        frame
    }

    fn build_output(&self, timestamp: f32) -> OutputFrame {
        OutputFrame::new(timestamp)
            .with(InputValue::Vector(self.state.position))
            .with(InputValue::Vector(Vec3::new(0.0, self.state.yaw, 0.0)))
            .with(InputValue::Vector(self.state.velocity))
            .with(InputValue::Bool(self.state.grounded))
            .with(InputValue::Float(self.state.coyote_time))
            .with(InputValue::Bool(self.state.jump_consumed))
    }

    fn execute(&mut self, input: &InputFrame, dt: f32) {
        self.controller.process(input, &mut self.state, dt);
    }

    fn apply_output(&mut self, output: &OutputFrame) {
        if let Some(position) = output.vector(OUTPUT_POSITION) {
            self.state.position = position;
        }
        if let Some(euler) = output.vector(OUTPUT_EULER) {
            self.state.yaw = euler.y;
        }
        if let Some(velocity) = output.vector(OUTPUT_VELOCITY) {
            self.state.velocity = velocity;
        }
        if let Some(grounded) = output.flag(OUTPUT_GROUNDED) {
            self.state.grounded = grounded;
        }
        if let Some(coyote_time) = output.float(OUTPUT_COYOTE) {
            self.state.coyote_time = coyote_time;
        }
        if let Some(consumed) = output.flag(OUTPUT_JUMP_CONSUMED) {
            self.state.jump_consumed = consumed;
        }
    }

    fn pose_layout(&self) -> Option<PoseLayout> {
        Some(PoseLayout {
            position: OUTPUT_POSITION,
            euler: Some(OUTPUT_EULER),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InstanceId, Transform};
    use crate::rpc::{DeliveryMode, MethodDescriptor, RpcValue};
    use crate::session::Role;

    fn invocation(methods: &MethodTable, name: &str, arg: RpcValue) -> Invocation {
        let (_, descriptor) = methods.lookup(name).unwrap();
        Invocation {
            sender: None,
            instance: InstanceId::new(1).unwrap(),
            mode: DeliveryMode::All,
            method: MethodDescriptor::clone(descriptor),
            args: vec![arg],
        }
    }

    #[test]
    fn test_registration_order_is_stable() {
        let mut methods = MethodTable::new();
        register_methods(&mut methods).unwrap();
        let names: Vec<_> = methods.iter().map(|(_, m)| m.name.as_str()).collect();
        assert_eq!(names, ["Move", "SetName", "Push", "Paint"]);

        let mut prefabs = PrefabRegistry::new();
        register_prefabs(&mut prefabs);
        assert!(prefabs.contains(PLAYER_PREFAB));
        assert!(prefabs.contains(CRATE_PREFAB));
        assert!(prefabs.contains(DRONE_PREFAB));
    }

    #[test]
    fn test_move_rpc_teleports() {
        let mut methods = MethodTable::new();
        register_methods(&mut methods).unwrap();
        let mut player = PlayerBehaviour::default();
        let mut transform = Transform::default();
        let mut ctx = EntityContext {
            instance: InstanceId::new(1).unwrap(),
            owner: None,
            local: None,
            role: Role::Server,
            transform: &mut transform,
        };

        player.on_rpc(&mut ctx, &invocation(&methods, "Move", Vec3::new(3.0, 0.0, 4.0).into()));
        player.on_rpc(&mut ctx, &invocation(&methods, "SetName", "ada".into()));

        assert_eq!(transform.position, Vec3::new(3.0, 0.0, 4.0));
        assert_eq!(player.state().position, Vec3::new(3.0, 0.0, 4.0));
        assert_eq!(player.name(), "ada");
    }

    #[test]
    fn test_output_round_trips_through_state() {
        let mut player = PlayerBehaviour::default();
        player.controls.direction = Vec3::Z;
        player.controls.jump = true;

        let input = player.build_input(0.0);
        assert!(!player.controls.jump);
        player.execute(&input, 1.0 / 60.0);
        let output = player.build_output(0.0);

        let mut mirror = PlayerBehaviour::default();
        mirror.apply_output(&output);
        assert_eq!(mirror.state(), player.state());
    }
}
