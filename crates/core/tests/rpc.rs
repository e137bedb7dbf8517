mod common;

use common::{Harness, settings};
use glam::Vec3;
use tether::directory::EntityContext;
use tether::player::PlayerBehaviour;
use tether::rpc::{RejectReason, RpcCall};
use tether::{
    Channel, DeliveryMode, Invocation, MessageType, MethodTable, NetBehaviour, NetEvent, NetSettings, PrefabRegistry,
    RpcError, RpcValue, Session, Transform,
};

#[derive(Default)]
struct Board {
    lines: Vec<String>,
}

impl NetBehaviour for Board {
    fn on_rpc(&mut self, _ctx: &mut EntityContext<'_>, call: &Invocation) {
        let text = match call.name() {
            "Say" => call.arg(0),
            "Whisper" => call.arg(1),
            _ => None,
        };
        if let Some(text) = text.and_then(RpcValue::as_str) {
            self.lines.push(text.to_string());
        }
    }
}

fn board_prefabs() -> PrefabRegistry {
    let mut prefabs = PrefabRegistry::new();
    prefabs.register("board", Board::default);
    prefabs
}

fn board_methods() -> MethodTable {
    let mut methods = MethodTable::new();
    methods.register("Board", "Say", 1).unwrap();
    methods.register("Board", "Whisper", 2).unwrap();
    methods
}

fn board_settings() -> NetSettings {
    NetSettings {
        player_prefab: None,
        ..settings()
    }
}

fn lines(context: &tether::NetContext, board: tether::InstanceId) -> Vec<String> {
    context
        .directory()
        .get(board)
        .and_then(|record| record.behaviour::<Board>())
        .map(|board| board.lines.clone())
        .unwrap_or_default()
}

#[test]
fn test_buffered_calls_replay_once_to_late_joiner() {
    let mut harness = Harness::with(board_settings(), board_prefabs, board_methods);
    let early = harness.join(board_prefabs, board_methods);
    let board = harness.server.spawn("board", Transform::default(), None).unwrap();
    harness.run(2);

    let say = |text: &str| vec![RpcValue::from(text)];
    harness.server.call(board, DeliveryMode::AllBuffered, "Say", say("a")).unwrap();
    harness.server.call(board, DeliveryMode::All, "Say", say("b")).unwrap();
    harness.server.call(board, DeliveryMode::OthersBuffered, "Say", say("c")).unwrap();
    harness.run(2);

    assert_eq!(lines(&harness.server, board), ["a", "b"]);
    assert_eq!(lines(&harness.clients[early], board), ["a", "b", "c"]);
    assert_eq!(harness.server.rpc().buffered().len(), 2);

    let late = harness.join(board_prefabs, board_methods);
    harness.run(4);
    assert_eq!(lines(&harness.clients[late], board), ["a", "c"]);
    assert_eq!(lines(&harness.clients[early], board), ["a", "b", "c"]);
}

#[test]
fn test_targeted_call_reaches_one_connection() {
    let mut harness = Harness::with(board_settings(), board_prefabs, board_methods);
    let first = harness.join(board_prefabs, board_methods);
    let second = harness.join(board_prefabs, board_methods);
    let board = harness.server.spawn("board", Transform::default(), None).unwrap();
    harness.run(2);

    let target = harness.client_id(second);
    harness
        .server
        .call(
            board,
            DeliveryMode::Target,
            "Whisper",
            vec![RpcValue::Connection(Some(target)), RpcValue::from("psst")],
        )
        .unwrap();
    harness.run(2);

    assert_eq!(lines(&harness.clients[second], board), ["psst"]);
    assert!(lines(&harness.clients[first], board).is_empty());
    assert!(lines(&harness.server, board).is_empty());

    let err = harness.clients[first]
        .call(
            board,
            DeliveryMode::Target,
            "Whisper",
            vec![RpcValue::Connection(Some(target)), RpcValue::from("psst")],
        )
        .unwrap_err();
    assert!(matches!(err, RpcError::TargetFromClient));
}

#[test]
fn test_local_mistakes_fail_before_sending() {
    let mut harness = Harness::new();
    let client = harness.join_default();
    let other = harness.join_default();
    let own = harness.player_of(client);
    let foreign = harness.player_of(other);

    let context = &mut harness.clients[client];
    assert!(matches!(
        context.call(own, DeliveryMode::All, "Move", vec![]),
        Err(RpcError::ArgumentCount { expected: 1, actual: 0, .. })
    ));
    assert!(matches!(
        context.call(own, DeliveryMode::All, "Fly", vec![Vec3::Y.into()]),
        Err(RpcError::UnknownMethod(_))
    ));
    assert!(matches!(
        context.call(foreign, DeliveryMode::All, "Move", vec![Vec3::Y.into()]),
        Err(RpcError::NotOwner(_))
    ));
}

#[test]
fn test_only_the_owner_may_move_its_player() {
    let mut harness = Harness::new();
    let owner = harness.join_default();
    let observer = harness.join_default();
    let player = harness.player_of(owner);
    harness.server.drain_events();

    // A misbehaving peer that skips the client-side checks.
    let mut rogue = Session::client(Box::new(harness.network.connect()));
    harness.run(1);
    rogue.pump();
    let (index, _) = harness.server.rpc().methods().lookup("Move").unwrap();
    let forged = RpcCall {
        sender: None,
        instance: player,
        mode: DeliveryMode::All,
        method: index,
        args: vec![Vec3::new(9.0, 0.0, 9.0).into()],
    };
    rogue
        .send_to_server(Channel::ReliableOrdered, MessageType::RPC, &forged.encode().unwrap())
        .unwrap();
    harness.run(2);

    assert!(harness.server.drain_events().iter().any(|event| matches!(
        event,
        NetEvent::RpcRejected { instance, reason: RejectReason::NotOwner, .. } if *instance == player
    )));
    let position = |context: &tether::NetContext| context.directory().get(player).unwrap().transform.position;
    assert_eq!(position(&harness.server), Vec3::ZERO);

    let target = Vec3::new(3.0, 0.0, 4.0);
    harness.clients[owner]
        .call(player, DeliveryMode::All, "Move", vec![target.into()])
        .unwrap();
    harness.run(4);

    let server_state = harness
        .server
        .directory()
        .get(player)
        .and_then(|record| record.behaviour::<PlayerBehaviour>())
        .unwrap()
        .state()
        .position;
    assert!(server_state.distance(target) < 1e-4);
    assert!(position(&harness.server).distance(target) < 1e-4);
    assert!(position(&harness.clients[owner]).distance(target) < 1e-4);
    assert!(position(&harness.clients[observer]).distance(target) < 1e-4);
}
