mod common;

use common::Harness;
use glam::Vec3;
use tether::player::{CRATE_PREFAB, CrateBehaviour, DRONE_PREFAB, PLAYER_PREFAB};
use tether::{EntityFlags, NetContext, NetEvent, Transform};

#[test]
fn test_clients_see_every_player() {
    let mut harness = Harness::new();
    let first = harness.join_default();
    let second = harness.join_default();
    harness.run(2);

    let first_id = harness.client_id(first);
    let second_id = harness.client_id(second);
    assert_ne!(first_id, second_id);

    for client in &harness.clients {
        assert_eq!(client.directory().len(), 2);
        let players: Vec<_> = client
            .directory()
            .iter()
            .filter(|record| record.is_player())
            .map(|record| (record.prefab.as_str(), record.owner))
            .collect();
        assert!(players.contains(&(PLAYER_PREFAB, Some(first_id))));
        assert!(players.contains(&(PLAYER_PREFAB, Some(second_id))));
    }

    let first_player = harness.player_of(first);
    assert_eq!(harness.clients[first].local_player(), Some(first_player));

    let events = harness.clients[first].drain_events();
    assert!(events.contains(&NetEvent::Connected { local: first_id }));
    assert!(events.contains(&NetEvent::RemoteConnected(second_id)));
}

#[test]
fn test_spawn_snapshot_reaches_late_joiner() {
    let mut harness = Harness::new();
    let crate_id = harness
        .server
        .spawn(CRATE_PREFAB, Transform::new(Vec3::new(1.0, 0.0, 2.0), Default::default()), None)
        .unwrap();
    harness
        .server
        .directory_mut()
        .get_mut(crate_id)
        .unwrap()
        .behaviour_mut::<CrateBehaviour>()
        .unwrap()
        .color = 7;

    let client = harness.join_default();
    let record = harness.clients[client].directory().get(crate_id).unwrap();
    assert_eq!(record.prefab, CRATE_PREFAB);
    assert_eq!(record.owner, None);
    assert!((record.transform.position - Vec3::new(1.0, 0.0, 2.0)).length() < 1e-5);
    assert_eq!(record.behaviour::<CrateBehaviour>().unwrap().color, 7);
}

#[test]
fn test_despawn_and_authority_are_mirrored() {
    let mut harness = Harness::new();
    let client = harness.join_default();
    let client_id = harness.client_id(client);

    let crate_id = harness.server.spawn(CRATE_PREFAB, Transform::default(), None).unwrap();
    harness.run(2);
    assert!(harness.clients[client].directory().contains(crate_id));

    harness.server.register_authority(client_id, crate_id).unwrap();
    harness.run(2);
    assert_eq!(harness.clients[client].directory().owner_of(crate_id), Some(Some(client_id)));

    harness.server.despawn(crate_id).unwrap();
    harness.run(2);
    assert!(!harness.clients[client].directory().contains(crate_id));
    assert!(
        harness.clients[client]
            .drain_events()
            .contains(&NetEvent::EntityDespawned { instance: crate_id })
    );
}

#[test]
fn test_disconnect_cascades_to_owned_entities() {
    let mut harness = Harness::new();
    let leaver = harness.join_default();
    let stayer = harness.join_default();
    let leaver_id = harness.client_id(leaver);
    let leaver_player = harness.player_of(leaver);

    let lent = harness.server.spawn(CRATE_PREFAB, Transform::default(), None).unwrap();
    let bound = harness
        .server
        .spawn_with(
            CRATE_PREFAB,
            Transform::default(),
            Some(leaver_id),
            EntityFlags::ACTIVE | EntityFlags::DESTROY_WITH_OWNER,
        )
        .unwrap();
    harness.server.register_authority(leaver_id, lent).unwrap();
    harness.run(2);
    harness.server.drain_events();

    harness.clients[leaver].disconnect();
    harness.run(3);

    let directory = harness.server.directory();
    assert!(!directory.contains(leaver_player));
    assert!(!directory.contains(bound));
    assert_eq!(directory.owner_of(lent), Some(None));
    assert!(harness.server.drain_events().iter().any(|event| matches!(
        event,
        NetEvent::ClientDisconnected { connection, .. } if *connection == leaver_id
    )));

    let observer = &mut harness.clients[stayer];
    assert!(!observer.directory().contains(leaver_player));
    assert!(!observer.directory().contains(bound));
    assert_eq!(observer.directory().owner_of(lent), Some(None));
    assert!(observer.drain_events().contains(&NetEvent::RemoteDisconnected(leaver_id)));

    let leaver = &mut harness.clients[leaver];
    assert!(leaver.directory().is_empty());
    assert!(leaver.local_id().is_none());
}

#[test]
fn test_held_spawn_is_released_with_its_owner() {
    let mut harness = Harness::new();
    let observer = harness.join_default();

    // Connected but never ready, so the observer is never told about it.
    let unready = NetContext::client(
        Box::new(harness.network.connect()),
        harness.server.settings().clone(),
        common::prefabs(),
        common::methods(),
    );
    harness.clients.push(unready);
    harness.run(4);
    let unready = harness.clients.len() - 1;
    let unready_id = harness.client_id(unready);

    let crate_id = harness
        .server
        .spawn(CRATE_PREFAB, Transform::default(), Some(unready_id))
        .unwrap();
    harness.run(2);
    assert!(!harness.clients[observer].directory().contains(crate_id));
    assert_eq!(harness.clients[observer].directory().buffered_len(), 1);

    harness.server.kick(unready_id);
    harness.run(2);

    assert_eq!(harness.server.directory().owner_of(crate_id), Some(None));
    let mirror = harness.clients[observer].directory();
    assert_eq!(mirror.owner_of(crate_id), Some(None));
    assert_eq!(mirror.buffered_len(), 0);
}

#[test]
fn test_kicked_client_is_told_and_cleared() {
    let mut harness = Harness::new();
    let client = harness.join_default();
    let client_id = harness.client_id(client);

    harness.server.kick(client_id);
    harness.run(2);

    assert!(harness.server.directory().is_empty());
    let events = harness.clients[client].drain_events();
    assert!(events.iter().any(|event| matches!(event, NetEvent::Disconnected { .. })));
    assert!(harness.clients[client].directory().is_empty());
}

#[test]
fn test_server_driven_drone_is_mirrored() {
    let mut harness = Harness::new();
    let client = harness.join_default();
    let drone = harness
        .server
        .spawn(DRONE_PREFAB, Transform::new(Vec3::new(0.0, 3.0, 0.0), Default::default()), None)
        .unwrap();
    harness.run(30);

    let server_pose = harness.server.directory().get(drone).unwrap().transform.position;
    let client_pose = harness.clients[client].directory().get(drone).unwrap().transform.position;
    assert!((server_pose.y - 3.0).abs() < 1e-4);
    // Clients trail the server by the one-way latency of the stream.
    assert!(server_pose.distance(client_pose) < 1.0);
    assert!(client_pose.distance(Vec3::new(0.0, 3.0, 0.0)) > 3.9);
}

#[test]
fn test_synced_pose_recovers_from_lost_update() {
    let mut harness = Harness::new();
    let client = harness.join_default();
    let crate_id = harness
        .server
        .spawn_with(
            CRATE_PREFAB,
            Transform::default(),
            None,
            EntityFlags::ACTIVE | EntityFlags::SYNC_TRANSFORM,
        )
        .unwrap();
    harness.run(2);

    harness.network.set_drop_unreliable(true);
    harness.server.directory_mut().get_mut(crate_id).unwrap().transform.position = Vec3::new(4.0, 0.0, 0.0);
    harness.run(3);
    let stale = harness.clients[client].directory().get(crate_id).unwrap().transform.position;
    assert_eq!(stale, Vec3::ZERO);

    harness.network.set_drop_unreliable(false);
    let refresh = harness.server.settings().pose_refresh_intervals as usize;
    harness.run(refresh + 2);
    let pose = harness.clients[client].directory().get(crate_id).unwrap().transform.position;
    assert!(pose.distance(Vec3::new(4.0, 0.0, 0.0)) < 1e-5);
}
