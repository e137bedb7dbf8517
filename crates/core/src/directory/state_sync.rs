use std::collections::HashMap;

use super::behaviour::Transform;
use super::entities::Directory;
use super::identity::InstanceId;
use super::messages::{EntityFlags, EntityStateMessage};

#[derive(Debug, Clone, Copy)]
struct SentPose {
    transform: Transform,
    /// Collects since this pose last went out.
    age: u32,
}

/// Tracks the last pose streamed for each `SYNC_TRANSFORM` entity. Changed
/// poses go out at once; unchanged ones are repeated every `refresh`
/// collects so a lost datagram is eventually repaired.
#[derive(Debug)]
pub struct PoseSync {
    last_sent: HashMap<InstanceId, SentPose>,
    refresh: u32,
}

impl PoseSync {
    pub fn new(refresh: u32) -> Self {
        Self {
            last_sent: HashMap::new(),
            refresh: refresh.max(1),
        }
    }

    pub fn collect(&mut self, directory: &Directory) -> Vec<EntityStateMessage> {
        self.last_sent.retain(|instance, _| directory.contains(*instance));

        let mut due = Vec::new();
        for record in directory
            .iter()
            .filter(|record| record.flags.contains(EntityFlags::SYNC_TRANSFORM))
        {
            if let Some(sent) = self.last_sent.get_mut(&record.instance)
                && sent.transform == record.transform
            {
                sent.age += 1;
                if sent.age < self.refresh {
                    continue;
                }
            }
            self.last_sent.insert(
                record.instance,
                SentPose {
                    transform: record.transform,
                    age: 0,
                },
            );
            due.push(EntityStateMessage {
                instance: record.instance,
                position: record.transform.position,
                euler: record.transform.euler(),
            });
        }
        due
    }

    /// Forgets a despawned entity so a reused id starts fresh.
    pub fn forget(&mut self, instance: InstanceId) {
        self.last_sent.remove(&instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{NetBehaviour, PrefabRegistry};
    use crate::net::MemoryNetwork;
    use crate::session::Session;
    use glam::Vec3;

    struct Door;
    impl NetBehaviour for Door {}

    #[test]
    fn test_only_changed_synced_poses_are_sent() {
        let network = MemoryNetwork::new();
        let mut session = Session::server(Box::new(network.server()), 4);
        let mut prefabs = PrefabRegistry::new();
        prefabs.register("door", || Door);
        let mut directory = Directory::new(prefabs);

        let synced = directory
            .spawn_with(
                &mut session,
                "door",
                Transform::default(),
                None,
                EntityFlags::ACTIVE | EntityFlags::SYNC_TRANSFORM,
            )
            .unwrap();
        directory
            .spawn_with(&mut session, "door", Transform::default(), None, EntityFlags::ACTIVE)
            .unwrap();

        let mut sync = PoseSync::new(10);
        assert_eq!(sync.collect(&directory).len(), 1);
        assert!(sync.collect(&directory).is_empty());

        directory.get_mut(synced).unwrap().transform.position = Vec3::new(0.0, 2.0, 0.0);
        let sent = sync.collect(&directory);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].instance, synced);
        assert_eq!(sent[0].position, Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn test_unchanged_pose_is_repeated_every_refresh() {
        let network = MemoryNetwork::new();
        let mut session = Session::server(Box::new(network.server()), 4);
        let mut prefabs = PrefabRegistry::new();
        prefabs.register("door", || Door);
        let mut directory = Directory::new(prefabs);
        directory
            .spawn_with(
                &mut session,
                "door",
                Transform::default(),
                None,
                EntityFlags::ACTIVE | EntityFlags::SYNC_TRANSFORM,
            )
            .unwrap();

        let mut sync = PoseSync::new(3);
        let sent: Vec<usize> = (0..7).map(|_| sync.collect(&directory).len()).collect();
        assert_eq!(sent, vec![1, 0, 0, 1, 0, 0, 1]);
    }
}
