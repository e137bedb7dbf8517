use crate::directory::Transform;

/// Moves a displayed pose toward the latest authoritative pose over a fixed
/// duration instead of snapping to it.
#[derive(Debug, Clone)]
pub struct PoseSmoother {
    from: Transform,
    to: Transform,
    elapsed: f32,
    duration: f32,
}

impl PoseSmoother {
    pub fn new(start: Transform, duration: f32) -> Self {
        Self {
            from: start,
            to: start,
            elapsed: duration,
            duration: duration.max(f32::EPSILON),
        }
    }

    /// Starts a new segment from wherever the pose currently is.
    pub fn retarget(&mut self, target: Transform) {
        self.from = self.sample();
        self.to = target;
        self.elapsed = 0.0;
    }

    pub fn advance(&mut self, dt: f32) -> Transform {
        self.elapsed = (self.elapsed + dt).min(self.duration);
        self.sample()
    }

    pub fn sample(&self) -> Transform {
        let alpha = (self.elapsed / self.duration).clamp(0.0, 1.0);
        Transform {
            position: self.from.position.lerp(self.to.position, alpha),
            orientation: self.from.orientation.slerp(self.to.orientation, alpha),
        }
    }

    pub fn target(&self) -> Transform {
        self.to
    }

    pub fn is_settled(&self) -> bool {
        self.elapsed >= self.duration
    }
}
