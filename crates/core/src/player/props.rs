use glam::Vec3;

use crate::directory::{EntityContext, NetBehaviour};
use crate::input::{InputFrame, InputValue, OutputFrame, PoseLayout, PredictedSimulation};
use crate::rpc::Invocation;
use crate::wire::{NetReader, NetWriter, WireError};

/// A server-owned box that anybody may push or repaint.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CrateBehaviour {
    pub color: i32,
    pub pushes: i32,
}

impl NetBehaviour for CrateBehaviour {
    fn write_spawn(&self, writer: &mut NetWriter) -> Result<(), WireError> {
        writer.write_i32(self.color);
        writer.write_i32(self.pushes);
        Ok(())
    }

    fn read_spawn(&mut self, reader: &mut NetReader<'_>) -> Result<(), WireError> {
        self.color = reader.read_i32()?;
        self.pushes = reader.read_i32()?;
        Ok(())
    }

    fn on_rpc(&mut self, ctx: &mut EntityContext<'_>, call: &Invocation) {
        match call.name() {
            "Push" => {
                if let Some(offset) = call.arg(0).and_then(|arg| arg.as_vec3()) {
                    ctx.transform.position += offset;
                    self.pushes += 1;
                }
            }
            "Paint" => {
                if let Some(color) = call.arg(0).and_then(|arg| arg.as_i32()) {
                    self.color = color;
                }
            }
            other => log::warn!("Crate {} has no method {other}", ctx.instance),
        }
    }
}

const DRONE_POSITION: usize = 0;
const DRONE_EULER: usize = 1;
const DRONE_ANGLE: usize = 2;

/// Circles its spawn point. The server drives it and clients mirror the
/// streamed outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct DroneBehaviour {
    center: Vec3,
    radius: f32,
    /// Radians per second.
    speed: f32,
    angle: f32,
}

impl Default for DroneBehaviour {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: 4.0,
            speed: 1.0,
            angle: 0.0,
        }
    }
}

impl DroneBehaviour {
    pub fn position(&self) -> Vec3 {
        self.center + Vec3::new(self.angle.cos(), 0.0, self.angle.sin()) * self.radius
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }
}

impl NetBehaviour for DroneBehaviour {
    fn on_server_init(&mut self, ctx: &mut EntityContext<'_>) {
        self.center = ctx.transform.position;
        ctx.transform.position = self.position();
    }

    fn write_spawn(&self, writer: &mut NetWriter) -> Result<(), WireError> {
        writer.write_vec3(self.center);
        writer.write_f32(self.radius);
        writer.write_f32(self.speed);
        writer.write_f32(self.angle);
        Ok(())
    }

    fn read_spawn(&mut self, reader: &mut NetReader<'_>) -> Result<(), WireError> {
        self.center = reader.read_vec3()?;
        self.radius = reader.read_f32()?;
        self.speed = reader.read_f32()?;
        self.angle = reader.read_f32()?;
        Ok(())
    }

    fn simulation(&mut self) -> Option<&mut dyn PredictedSimulation> {
        Some(self)
    }
}

impl PredictedSimulation for DroneBehaviour {
    fn build_input(&mut self, timestamp: f32) -> InputFrame {
        InputFrame::new(timestamp)
    }

    fn build_output(&self, timestamp: f32) -> OutputFrame {
        // Facing along the orbit tangent.
        let heading = -self.angle;
        OutputFrame::new(timestamp)
            .with(InputValue::Vector(self.position()))
            .with(InputValue::Vector(Vec3::new(0.0, heading, 0.0)))
            .with(InputValue::Float(self.angle))
    }

    fn execute(&mut self, _input: &InputFrame, dt: f32) {
        self.angle = (self.angle + self.speed * dt).rem_euclid(std::f32::consts::TAU);
    }

    fn apply_output(&mut self, output: &OutputFrame) {
        if let Some(angle) = output.float(DRONE_ANGLE) {
            self.angle = angle;
        }
    }

    fn pose_layout(&self) -> Option<PoseLayout> {
        Some(PoseLayout {
            position: DRONE_POSITION,
            euler: Some(DRONE_EULER),
        })
    }
}
