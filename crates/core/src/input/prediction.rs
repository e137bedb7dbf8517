use std::collections::{BTreeMap, VecDeque};

use crate::config::NetSettings;
use crate::directory::{Directory, InstanceId, Transform};
use crate::net::Channel;
use crate::session::{ConnectionId, NetEvent, Role, Session};
use crate::wire::{ENVELOPE_HEADER_SIZE, MessageType};

use super::frame::{InputFrame, OutputFrame};
use super::interpolation::PoseSmoother;
use super::stream::{InputStream, STREAM_HEADER_SIZE, encode_stream_message};

/// Indices of the pose inside an output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseLayout {
    pub position: usize,
    pub euler: Option<usize>,
}

/// The hooks a predicted entity gives the engine.
pub trait PredictedSimulation {
    /// Samples current control state.
    fn build_input(&mut self, timestamp: f32) -> InputFrame;

    /// Samples the simulation state that results from the inputs run so far.
    fn build_output(&self, timestamp: f32) -> OutputFrame;

    /// Advances the simulation by one tick.
    fn execute(&mut self, input: &InputFrame, dt: f32);

    /// Overwrites simulation state with an authoritative frame.
    fn apply_output(&mut self, output: &OutputFrame);

    /// Where the pose lives in output frames. Entities that report one get
    /// their transform kept in step with the simulation.
    fn pose_layout(&self) -> Option<PoseLayout> {
        None
    }
}

/// How this peer takes part in an entity's prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionRole {
    /// Client driving its own entity.
    Owner,
    /// Server running a client-owned entity from received inputs.
    Server,
    /// Server driving a server-owned entity.
    ServerOwned,
    /// Client mirroring somebody else's entity.
    Observer,
}

impl PredictionRole {
    pub fn resolve(role: Role, owner: Option<ConnectionId>, local: Option<ConnectionId>) -> Self {
        match (role, owner) {
            (Role::Server, None) => PredictionRole::ServerOwned,
            (Role::Server, Some(_)) => PredictionRole::Server,
            (Role::Client, Some(owner)) if Some(owner) == local => PredictionRole::Owner,
            (Role::Client, _) => PredictionRole::Observer,
        }
    }
}

/// A captured input and the output predicted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub input: InputFrame,
    pub output: OutputFrame,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Correction {
    Hard(f32),
    Replayed(f32, usize),
}

#[derive(Debug)]
struct Tracked {
    role: PredictionRole,
    outbound: InputStream,
    received: Vec<InputFrame>,
    records: VecDeque<PredictionRecord>,
    last_acked: Option<f32>,
    last_executed: Option<f32>,
    smoother: Option<PoseSmoother>,
}

impl Tracked {
    fn new(role: PredictionRole) -> Self {
        Self {
            role,
            outbound: InputStream::new(),
            received: Vec::new(),
            records: VecDeque::new(),
            last_acked: None,
            last_executed: None,
            smoother: None,
        }
    }

    fn take_received(&mut self) -> Vec<InputFrame> {
        let mut frames = std::mem::take(&mut self.received);
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        frames
    }

    /// Returns false for frames older than the newest acknowledged one.
    fn acknowledge(&mut self, timestamp: f32, tolerance: f32) -> bool {
        if self.last_acked.is_some_and(|acked| timestamp < acked - tolerance) {
            return false;
        }
        self.last_acked = Some(timestamp);
        true
    }

    fn reconcile(&mut self, sim: &mut dyn PredictedSimulation, dt: f32) -> Vec<Correction> {
        let tolerance = dt * 0.5;
        let mut corrections = Vec::new();

        for output in self.take_received() {
            let timestamp = output.timestamp;
            if !self.acknowledge(timestamp, tolerance) {
                continue;
            }
            self.records
                .retain(|record| record.input.timestamp >= timestamp - tolerance);

            let matching = self
                .records
                .front()
                .is_some_and(|record| (record.input.timestamp - timestamp).abs() < tolerance);
            if !matching {
                sim.apply_output(&output);
                corrections.push(Correction::Hard(timestamp));
                continue;
            }

            let Some(first) = self.records.front_mut() else {
                continue;
            };
            if first.output.approx_eq(&output) {
                continue;
            }

            sim.apply_output(&output);
            first.output = output;
            let mut replayed = 0;
            for record in self.records.iter_mut().skip(1) {
                sim.execute(&record.input, dt);
                record.output = sim.build_output(record.input.timestamp);
                replayed += 1;
            }
            corrections.push(Correction::Replayed(timestamp, replayed));
        }
        corrections
    }

    fn capture(&mut self, sim: &mut dyn PredictedSimulation, timestamp: f32, dt: f32, max_records: usize) -> OutputFrame {
        let mut input = sim.build_input(timestamp);
        input.timestamp = timestamp;
        self.outbound.push(input.clone());

        sim.execute(&input, dt);
        let output = sim.build_output(timestamp);
        self.records.push_back(PredictionRecord {
            input,
            output: output.clone(),
        });
        while self.records.len() > max_records {
            self.records.pop_front();
        }
        output
    }

    fn serve(&mut self, sim: &mut dyn PredictedSimulation, dt: f32) -> Option<OutputFrame> {
        let tolerance = dt * 0.5;
        let mut latest = None;
        for input in self.take_received() {
            if self
                .last_executed
                .is_some_and(|last| input.timestamp <= last + tolerance)
            {
                continue;
            }
            sim.execute(&input, dt);
            let output = sim.build_output(input.timestamp);
            self.last_executed = Some(input.timestamp);
            self.outbound.push(output.clone());
            latest = Some(output);
        }
        latest
    }

    fn drive(&mut self, sim: &mut dyn PredictedSimulation, timestamp: f32, dt: f32) -> OutputFrame {
        let mut input = sim.build_input(timestamp);
        input.timestamp = timestamp;
        sim.execute(&input, dt);
        let output = sim.build_output(timestamp);
        self.outbound.push(output.clone());
        output
    }

    fn observe(&mut self, sim: &mut dyn PredictedSimulation, dt: f32) -> Option<OutputFrame> {
        let tolerance = dt * 0.5;
        let mut latest = None;
        for output in self.take_received() {
            if !self.acknowledge(output.timestamp, tolerance) {
                continue;
            }
            sim.apply_output(&output);
            latest = Some(output);
        }
        latest
    }
}

fn pose_of(layout: PoseLayout, frame: &OutputFrame, current: Transform) -> Option<Transform> {
    let position = frame.vector(layout.position)?;
    let orientation = match layout.euler.and_then(|index| frame.vector(index)) {
        Some(euler) => Transform::from_euler(position, euler).orientation,
        None => current.orientation,
    };
    Some(Transform::new(position, orientation))
}

/// Per-entity prediction state for every entity whose behaviour exposes a
/// [`PredictedSimulation`].
#[derive(Debug)]
pub struct PredictionEngine {
    tracked: BTreeMap<InstanceId, Tracked>,
    dt: f32,
    max_records: usize,
    smoothing: bool,
    smoothing_duration: f32,
    /// Largest batch that still fits one channel message once addressed
    /// and enveloped.
    batch_limit: usize,
}

impl PredictionEngine {
    pub fn new(settings: &NetSettings) -> Self {
        Self {
            tracked: BTreeMap::new(),
            dt: settings.fixed_dt(),
            max_records: settings.max_prediction_records.max(1),
            smoothing: settings.observer_smoothing,
            smoothing_duration: settings.send_interval(),
            batch_limit: settings
                .fragment_size
                .saturating_sub(ENVELOPE_HEADER_SIZE + STREAM_HEADER_SIZE),
        }
    }

    pub fn timestamp(&self, tick: u64) -> f32 {
        tick as f32 * self.dt
    }

    /// Starts tracking `instance` if its behaviour takes part in prediction.
    /// Re-tracking an entity whose role changed resets its state.
    pub fn track(&mut self, session: &Session, directory: &mut Directory, instance: InstanceId) -> bool {
        let Some(record) = directory.get_mut(instance) else {
            return false;
        };
        if record.behaviour.simulation().is_none() {
            return false;
        }
        let role = PredictionRole::resolve(session.role(), record.owner, session.local_id());
        if self.role_of(instance) == Some(role) {
            return true;
        }
        log::debug!("Predicting {} as {:?}", instance, role);
        self.tracked.insert(instance, Tracked::new(role));
        true
    }

    pub fn untrack(&mut self, instance: InstanceId) -> bool {
        self.tracked.remove(&instance).is_some()
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn role_of(&self, instance: InstanceId) -> Option<PredictionRole> {
        self.tracked.get(&instance).map(|tracked| tracked.role)
    }

    pub fn records(&self, instance: InstanceId) -> impl Iterator<Item = &PredictionRecord> {
        self.tracked
            .get(&instance)
            .into_iter()
            .flat_map(|tracked| tracked.records.iter())
    }

    pub fn last_acked(&self, instance: InstanceId) -> Option<f32> {
        self.tracked.get(&instance).and_then(|tracked| tracked.last_acked)
    }

    /// Server: queues inputs from the entity's owner.
    pub fn receive_inputs(&mut self, instance: InstanceId, frames: Vec<InputFrame>) -> bool {
        match self.tracked.get_mut(&instance) {
            Some(tracked) if tracked.role == PredictionRole::Server => {
                tracked.received.extend(frames);
                true
            }
            _ => false,
        }
    }

    /// Client: queues authoritative outputs.
    pub fn receive_outputs(&mut self, instance: InstanceId, frames: Vec<OutputFrame>) -> bool {
        match self.tracked.get_mut(&instance) {
            Some(tracked) if matches!(tracked.role, PredictionRole::Owner | PredictionRole::Observer) => {
                tracked.received.extend(frames);
                true
            }
            _ => false,
        }
    }

    /// Runs one tick for every tracked entity.
    pub fn tick(&mut self, session: &mut Session, directory: &mut Directory, tick: u64) {
        let timestamp = self.timestamp(tick);
        let dt = self.dt;
        let max_records = self.max_records;
        let smoothing = self.smoothing;
        let smoothing_duration = self.smoothing_duration;

        for (&instance, tracked) in &mut self.tracked {
            let Some(record) = directory.get_mut(instance) else {
                continue;
            };
            let current = record.transform;
            let Some(sim) = record.behaviour.simulation() else {
                continue;
            };
            let layout = sim.pose_layout();

            let latest = match tracked.role {
                PredictionRole::Owner => {
                    for correction in tracked.reconcile(sim, dt) {
                        let event = match correction {
                            Correction::Hard(timestamp) => {
                                log::debug!("Hard correction of {} at {:.3}", instance, timestamp);
                                NetEvent::HardCorrection { instance, timestamp }
                            }
                            Correction::Replayed(timestamp, replayed) => {
                                log::debug!("Corrected {} at {:.3}, replayed {}", instance, timestamp, replayed);
                                NetEvent::Corrected {
                                    instance,
                                    timestamp,
                                    replayed,
                                }
                            }
                        };
                        session.emit(event);
                    }
                    Some(tracked.capture(sim, timestamp, dt, max_records))
                }
                PredictionRole::Server => tracked.serve(sim, dt),
                PredictionRole::ServerOwned => Some(tracked.drive(sim, timestamp, dt)),
                PredictionRole::Observer => tracked.observe(sim, dt),
            };

            let Some(layout) = layout else {
                continue;
            };
            let pose = latest.and_then(|frame| pose_of(layout, &frame, current));

            if tracked.role == PredictionRole::Observer && smoothing {
                let smoother = tracked
                    .smoother
                    .get_or_insert_with(|| PoseSmoother::new(current, smoothing_duration));
                if let Some(pose) = pose {
                    smoother.retarget(pose);
                }
                record.transform = smoother.advance(dt);
            } else if let Some(pose) = pose {
                record.transform = pose;
            }
        }
    }

    /// Sends queued inputs (owner) or outputs (server), one message per
    /// entity.
    pub fn flush(&mut self, session: &mut Session, channel: Channel) {
        for (&instance, tracked) in &mut self.tracked {
            let message_type = match tracked.role {
                PredictionRole::Owner => MessageType::CLIENT_INPUT,
                PredictionRole::Server | PredictionRole::ServerOwned => MessageType::SERVER_OUTPUT,
                PredictionRole::Observer => continue,
            };
            let batches = match tracked.outbound.take_batches(self.batch_limit) {
                Ok(batches) => batches,
                Err(e) => {
                    log::warn!("Dropping stream batch for {}: {}", instance, e);
                    continue;
                }
            };
            for batch in batches {
                let payload = encode_stream_message(instance, &batch);
                if session.is_server() {
                    session.broadcast(channel, message_type, &payload);
                } else if let Err(e) = session.send_to_server(channel, message_type, &payload) {
                    log::warn!("Failed to send inputs for {}: {}", instance, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{EntityContext, NetBehaviour, PrefabRegistry};
    use crate::input::InputValue;
    use crate::net::MemoryNetwork;
    use glam::{Quat, Vec3};

    /// Moves along x by `speed * dt` while the input asks for it. A wall at
    /// `wall` stops it.
    struct Slider {
        x: f32,
        speed: f32,
        wall: f32,
        pressing: bool,
    }

    impl Default for Slider {
        fn default() -> Self {
            Self {
                x: 0.0,
                speed: 1.0,
                wall: f32::MAX,
                pressing: true,
            }
        }
    }

    impl PredictedSimulation for Slider {
        fn build_input(&mut self, timestamp: f32) -> InputFrame {
            InputFrame::new(timestamp).with(InputValue::Bool(self.pressing))
        }

        fn build_output(&self, timestamp: f32) -> OutputFrame {
            InputFrame::new(timestamp).with(InputValue::Vector(Vec3::new(self.x, 0.0, 0.0)))
        }

        fn execute(&mut self, input: &InputFrame, dt: f32) {
            if input.flag(0) == Some(true) {
                self.x = (self.x + self.speed * dt).min(self.wall);
            }
        }

        fn apply_output(&mut self, output: &OutputFrame) {
            if let Some(position) = output.vector(0) {
                self.x = position.x;
            }
        }

        fn pose_layout(&self) -> Option<PoseLayout> {
            Some(PoseLayout {
                position: 0,
                euler: None,
            })
        }
    }

    impl NetBehaviour for Slider {
        fn simulation(&mut self) -> Option<&mut dyn PredictedSimulation> {
            Some(self)
        }
    }

    fn settings() -> NetSettings {
        NetSettings {
            tick_rate: 10,
            observer_smoothing: false,
            ..NetSettings::default()
        }
    }

    fn slider(directory: &Directory, instance: InstanceId) -> &Slider {
        directory.get(instance).unwrap().behaviour::<Slider>().unwrap()
    }

    /// A server directory with one slider owned by the first connection,
    /// plus a client-side session with that connection as its local id.
    fn owner_fixture() -> (Session, Directory, InstanceId) {
        let network = MemoryNetwork::new();
        let mut server = Session::server(Box::new(network.server()), 4);
        let client_transport = network.connect();
        server.pump();
        let conn = ConnectionId::new(1).unwrap();

        let mut prefabs = PrefabRegistry::new();
        prefabs.register("slider", Slider::default);
        let mut directory = Directory::new(prefabs);
        let instance = directory
            .spawn(&mut server, "slider", Vec3::ZERO, Quat::IDENTITY, Some(conn))
            .unwrap();

        let mut client = Session::client(Box::new(client_transport));
        client.set_local_id(conn);
        (client, directory, instance)
    }

    #[test]
    fn test_roles_resolve_from_ownership() {
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);
        assert_eq!(PredictionRole::resolve(Role::Server, None, None), PredictionRole::ServerOwned);
        assert_eq!(PredictionRole::resolve(Role::Server, a, None), PredictionRole::Server);
        assert_eq!(PredictionRole::resolve(Role::Client, a, a), PredictionRole::Owner);
        assert_eq!(PredictionRole::resolve(Role::Client, a, b), PredictionRole::Observer);
        assert_eq!(PredictionRole::resolve(Role::Client, None, a), PredictionRole::Observer);
    }

    #[test]
    fn test_only_simulations_are_tracked() {
        struct Inert;
        impl NetBehaviour for Inert {}

        let network = MemoryNetwork::new();
        let mut server = Session::server(Box::new(network.server()), 4);
        let mut prefabs = PrefabRegistry::new();
        prefabs.register("inert", || Inert);
        prefabs.register("slider", Slider::default);
        let mut directory = Directory::new(prefabs);
        let inert = directory.spawn(&mut server, "inert", Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        let moving = directory.spawn(&mut server, "slider", Vec3::ZERO, Quat::IDENTITY, None).unwrap();

        let mut engine = PredictionEngine::new(&settings());
        assert!(!engine.track(&server, &mut directory, inert));
        assert!(engine.track(&server, &mut directory, moving));
        assert_eq!(engine.role_of(moving), Some(PredictionRole::ServerOwned));

        engine.tick(&mut server, &mut directory, 1);
        assert!((slider(&directory, moving).x - 0.1).abs() < 1e-6);
        assert!((directory.get(moving).unwrap().transform.position.x - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_owner_records_every_tick() {
        let (mut client, mut directory, instance) = owner_fixture();
        let mut engine = PredictionEngine::new(&settings());
        assert!(engine.track(&client, &mut directory, instance));
        assert_eq!(engine.role_of(instance), Some(PredictionRole::Owner));

        for tick in 1..=5 {
            engine.tick(&mut client, &mut directory, tick);
        }
        assert_eq!(engine.records(instance).count(), 5);
        assert!((slider(&directory, instance).x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_matching_output_changes_nothing() {
        let (mut client, mut directory, instance) = owner_fixture();
        let mut engine = PredictionEngine::new(&settings());
        engine.track(&client, &mut directory, instance);
        for tick in 1..=3 {
            engine.tick(&mut client, &mut directory, tick);
        }
        let predicted = engine.records(instance).nth(1).cloned().unwrap();

        engine.receive_outputs(instance, vec![predicted.output.clone()]);
        engine.tick(&mut client, &mut directory, 4);

        assert_eq!(engine.records(instance).next(), Some(&predicted));
        assert_eq!(engine.records(instance).count(), 3);
        assert!(client.drain_events().is_empty());
        assert!((slider(&directory, instance).x - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_mismatch_snaps_and_replays_later_inputs() {
        let (mut client, mut directory, instance) = owner_fixture();
        let mut engine = PredictionEngine::new(&settings());
        engine.track(&client, &mut directory, instance);
        for tick in 1..=4 {
            engine.tick(&mut client, &mut directory, tick);
        }
        // Predicted 0.1 at tick 1; the server saw a wall at 0.05.
        let authoritative = InputFrame::new(engine.timestamp(1)).with(InputValue::Vector(Vec3::new(0.05, 0.0, 0.0)));
        engine.receive_outputs(instance, vec![authoritative]);
        engine.tick(&mut client, &mut directory, 5);

        let events = client.drain_events();
        assert!(matches!(
            events.as_slice(),
            [NetEvent::Corrected { replayed: 3, .. }]
        ));
        // 0.05 plus ticks 2..=4 replayed plus tick 5 captured.
        assert!((slider(&directory, instance).x - 0.45).abs() < 1e-5);
        let outputs: Vec<f32> = engine
            .records(instance)
            .map(|r| r.output.vector(0).unwrap().x)
            .collect();
        assert_eq!(outputs.len(), 5);
        assert!((outputs[1] - 0.15).abs() < 1e-5);
    }

    #[test]
    fn test_missing_record_is_hard_correction() {
        let (mut client, mut directory, instance) = owner_fixture();
        let mut engine = PredictionEngine::new(&settings());
        engine.track(&client, &mut directory, instance);
        engine.tick(&mut client, &mut directory, 10);

        let stale = InputFrame::new(engine.timestamp(3)).with(InputValue::Vector(Vec3::new(2.0, 0.0, 0.0)));
        engine.receive_outputs(instance, vec![stale]);
        engine.tick(&mut client, &mut directory, 11);

        assert!(matches!(
            client.drain_events().as_slice(),
            [NetEvent::HardCorrection { .. }]
        ));
        assert!((slider(&directory, instance).x - 2.1).abs() < 1e-5);
        // Later predictions stay, to be checked against their own outputs.
        let kept = engine.timestamp(10);
        assert!(
            engine
                .records(instance)
                .any(|record| (record.input.timestamp - kept).abs() < 1e-6)
        );
    }

    #[test]
    fn test_outputs_older_than_ack_ignored() {
        let (mut client, mut directory, instance) = owner_fixture();
        let mut engine = PredictionEngine::new(&settings());
        engine.track(&client, &mut directory, instance);
        for tick in 1..=3 {
            engine.tick(&mut client, &mut directory, tick);
        }
        let newer = engine.records(instance).nth(2).cloned().unwrap().output;
        let older = InputFrame::new(engine.timestamp(1)).with(InputValue::Vector(Vec3::new(9.0, 0.0, 0.0)));

        engine.receive_outputs(instance, vec![newer]);
        engine.tick(&mut client, &mut directory, 4);
        engine.receive_outputs(instance, vec![older]);
        engine.tick(&mut client, &mut directory, 5);

        assert!(client.drain_events().is_empty());
        assert_eq!(engine.last_acked(instance), Some(engine.timestamp(3)));
    }

    #[test]
    fn test_server_executes_each_timestamp_once() {
        let network = MemoryNetwork::new();
        let mut server = Session::server(Box::new(network.server()), 4);
        let _client = network.connect();
        server.pump();
        let conn = ConnectionId::new(1).unwrap();

        let mut prefabs = PrefabRegistry::new();
        prefabs.register("slider", Slider::default);
        let mut directory = Directory::new(prefabs);
        let instance = directory
            .spawn(&mut server, "slider", Vec3::ZERO, Quat::IDENTITY, Some(conn))
            .unwrap();
        let mut engine = PredictionEngine::new(&settings());
        engine.track(&server, &mut directory, instance);
        assert_eq!(engine.role_of(instance), Some(PredictionRole::Server));

        let press = |t: f32| InputFrame::new(t).with(InputValue::Bool(true));
        engine.receive_inputs(instance, vec![press(0.2), press(0.1)]);
        engine.tick(&mut server, &mut directory, 1);
        engine.receive_inputs(instance, vec![press(0.2), press(0.3)]);
        engine.tick(&mut server, &mut directory, 2);

        assert!((slider(&directory, instance).x - 0.3).abs() < 1e-5);
        // Nothing arrived: the entity simply waits.
        engine.tick(&mut server, &mut directory, 3);
        assert!((slider(&directory, instance).x - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_observer_smooths_toward_output() {
        let (_, mut directory, instance) = owner_fixture();
        let network = MemoryNetwork::new();
        let _server = network.server();
        let mut observer = Session::client(Box::new(network.connect()));
        observer.set_local_id(ConnectionId::new(2).unwrap());

        let mut engine = PredictionEngine::new(&NetSettings {
            observer_smoothing: true,
            send_delay_ms: 200,
            ..settings()
        });
        engine.track(&observer, &mut directory, instance);
        assert_eq!(engine.role_of(instance), Some(PredictionRole::Observer));

        let target = InputFrame::new(0.1).with(InputValue::Vector(Vec3::new(1.0, 0.0, 0.0)));
        engine.receive_outputs(instance, vec![target]);
        engine.tick(&mut observer, &mut directory, 1);

        assert_eq!(slider(&directory, instance).x, 1.0);
        let shown = directory.get(instance).unwrap().transform.position.x;
        assert!(shown > 0.0 && shown < 1.0);
    }
}
