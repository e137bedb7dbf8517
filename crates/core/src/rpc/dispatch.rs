use std::collections::BTreeMap;

use crate::directory::{Directory, InstanceId};
use crate::net::Channel;
use crate::session::{ConnectionId, NetEvent, Session};
use crate::wire::MessageType;

use super::call::{DeliveryMode, Invocation, RpcCall};
use super::method::{MethodDescriptor, MethodTable};
use super::value::RpcValue;
use super::{RejectReason, RpcError};

/// An encoded call kept for replay to late joiners.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedCall {
    pub instance: InstanceId,
    pub sender: Option<ConnectionId>,
    pub bytes: Vec<u8>,
}

/// Issues, routes and buffers RPCs. All RPC traffic uses the
/// reliable-ordered channel.
#[derive(Debug, Default)]
pub struct RpcDispatcher {
    methods: MethodTable,
    /// Server: buffered-mode calls in issue order.
    buffered: Vec<BufferedCall>,
    /// Client: buffered-mode calls that arrived before their instance.
    pending: BTreeMap<InstanceId, Vec<Vec<u8>>>,
}

impl RpcDispatcher {
    pub fn new(methods: MethodTable) -> Self {
        Self {
            methods,
            buffered: Vec::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn buffered(&self) -> &[BufferedCall] {
        &self.buffered
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Validates and issues a call. Local programming errors are reported
    /// before anything is sent.
    pub fn call(
        &mut self,
        session: &mut Session,
        directory: &mut Directory,
        instance: InstanceId,
        mode: DeliveryMode,
        method: &str,
        args: Vec<RpcValue>,
    ) -> Result<(), RpcError> {
        let (index, descriptor) = self
            .methods
            .lookup(method)
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;
        if args.len() != descriptor.arg_count {
            return Err(RpcError::ArgumentCount {
                method: method.to_string(),
                expected: descriptor.arg_count,
                actual: args.len(),
            });
        }
        if !session.is_connected() {
            return Err(RpcError::NotConnected);
        }
        let owner = directory
            .owner_of(instance)
            .ok_or(RpcError::UnknownInstance(instance))?;
        let descriptor = descriptor.clone();

        if session.is_server() {
            let target = if mode == DeliveryMode::Target {
                Some(Self::resolve_target(session, &args)?)
            } else {
                None
            };
            let call = RpcCall {
                sender: None,
                instance,
                mode,
                method: index,
                args,
            };
            let bytes = call.encode()?;

            match (mode, target) {
                (DeliveryMode::Target, Some(target)) => {
                    session.send(target, Channel::ReliableOrdered, MessageType::RPC, &bytes)?;
                }
                (DeliveryMode::ServerOnly, _) => {}
                _ => session.broadcast(Channel::ReliableOrdered, MessageType::RPC, &bytes),
            }
            if mode == DeliveryMode::ServerOnly || mode.includes_sender() {
                directory.invoke(session, &Invocation::new(call, descriptor));
            }
            if mode.is_buffered() {
                self.buffered.push(BufferedCall {
                    instance,
                    sender: None,
                    bytes,
                });
            }
            return Ok(());
        }

        if mode == DeliveryMode::Target {
            return Err(RpcError::TargetFromClient);
        }
        let local = session.local_id();
        if mode != DeliveryMode::ServerOnly && (owner.is_none() || owner != local) {
            return Err(RpcError::NotOwner(instance));
        }
        let call = RpcCall {
            sender: local,
            instance,
            mode,
            method: index,
            args,
        };
        session.send_to_server(Channel::ReliableOrdered, MessageType::RPC, &call.encode()?)?;
        Ok(())
    }

    fn resolve_target(session: &Session, args: &[RpcValue]) -> Result<ConnectionId, RpcError> {
        args.first()
            .and_then(RpcValue::as_connection)
            .filter(|&target| session.connections().contains(target))
            .ok_or(RpcError::InvalidTarget)
    }

    /// Handles an incoming RPC message. Violations are logged and reported
    /// as `RpcRejected` events; nothing propagates to the sender.
    pub fn receive(
        &mut self,
        session: &mut Session,
        directory: &mut Directory,
        from: Option<ConnectionId>,
        payload: &[u8],
    ) {
        let call = match RpcCall::decode(payload) {
            Ok(call) => call,
            Err(e) => {
                log::warn!("Malformed RPC from {:?}: {}", from, e);
                return;
            }
        };

        if session.is_server() {
            if let Some(sender) = from {
                self.receive_on_server(session, directory, sender, call);
            }
        } else {
            self.receive_on_client(session, directory, call, payload);
        }
    }

    fn receive_on_server(
        &mut self,
        session: &mut Session,
        directory: &mut Directory,
        sender: ConnectionId,
        mut call: RpcCall,
    ) {
        call.sender = Some(sender);
        let instance = call.instance;
        let reject = |session: &mut Session, reason: RejectReason| {
            log::debug!("Rejected RPC on {} from {}: {:?}", instance, sender, reason);
            session.emit(NetEvent::RpcRejected {
                sender: Some(sender),
                instance,
                reason,
            });
        };

        let Some(descriptor) = self.methods.get(call.method).cloned() else {
            return reject(session, RejectReason::UnknownMethod);
        };
        if call.args.len() != descriptor.arg_count {
            return reject(session, RejectReason::ArgumentCount);
        }
        if call.mode == DeliveryMode::Target {
            return reject(session, RejectReason::TargetFromClient);
        }
        let Some(owner) = directory.owner_of(instance) else {
            log::debug!("Dropping RPC for unknown instance {}", instance);
            return;
        };
        if call.mode != DeliveryMode::ServerOnly && owner != Some(sender) {
            return reject(session, RejectReason::NotOwner);
        }

        let bytes = match call.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to re-encode RPC from {}: {}", sender, e);
                return;
            }
        };
        let mode = call.mode;
        directory.invoke(session, &Invocation::new(call, descriptor));

        match mode {
            DeliveryMode::All | DeliveryMode::AllBuffered => {
                session.broadcast(Channel::ReliableOrdered, MessageType::RPC, &bytes)
            }
            DeliveryMode::Others | DeliveryMode::OthersBuffered => session.broadcast_excluding(
                sender,
                Channel::ReliableOrdered,
                MessageType::RPC,
                &bytes,
            ),
            DeliveryMode::ServerOnly | DeliveryMode::Target => {}
        }
        if mode.is_buffered() {
            self.buffered.push(BufferedCall {
                instance,
                sender: Some(sender),
                bytes,
            });
        }
    }

    fn receive_on_client(&mut self, session: &mut Session, directory: &mut Directory, call: RpcCall, payload: &[u8]) {
        let Some(descriptor) = self.methods.get(call.method).cloned() else {
            log::warn!("RPC names unknown method index {:?}", call.method);
            return;
        };
        if !directory.contains(call.instance) {
            if call.mode.is_buffered() {
                log::debug!("Holding RPC {} until {} exists", descriptor.name, call.instance);
                self.pending
                    .entry(call.instance)
                    .or_default()
                    .push(payload.to_vec());
            }
            return;
        }
        directory.invoke(session, &Invocation::new(call, descriptor));
    }

    /// Client: delivers calls that were waiting for `instance`, in arrival
    /// order.
    pub fn instance_created(&mut self, session: &mut Session, directory: &mut Directory, instance: InstanceId) {
        let Some(calls) = self.pending.remove(&instance) else {
            return;
        };
        for bytes in calls {
            self.receive(session, directory, None, &bytes);
        }
    }

    /// Server: sends every buffered call to a joining connection.
    pub fn replay_to(&self, session: &mut Session, connection: ConnectionId) -> usize {
        let mut sent = 0;
        for call in &self.buffered {
            match session.send(connection, Channel::ReliableOrdered, MessageType::RPC, &call.bytes) {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::warn!("Buffered RPC replay to {} failed: {}", connection, e);
                    break;
                }
            }
        }
        sent
    }

    pub fn drop_instance(&mut self, instance: InstanceId) {
        self.buffered.retain(|call| call.instance != instance);
        self.pending.remove(&instance);
    }

    pub fn drop_sender(&mut self, connection: ConnectionId) {
        self.buffered.retain(|call| call.sender != Some(connection));
    }

    pub fn clear(&mut self) {
        self.buffered.clear();
        self.pending.clear();
    }

    pub fn descriptor(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.lookup(name).map(|(_, method)| method)
    }
}
