//! Handler registry for dispatching decoded payloads by logical id.
//!
//! Every logical id has at most one handler. Registering a second one is an
//! error, and so is dispatching an id nobody handles.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{AnyPayload, Packet};
use crate::connection::Connection;
use crate::error::{ProtocolError, Result};
use crate::registry::{PacketId, ProtocolRegistry};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Trait for handler functions.
///
/// Handlers run on the connection's read task, in arrival order. Long work
/// belongs on a spawned task.
pub trait Handler: Send + Sync + 'static {
    /// `TypeId` of the payload this handler expects.
    fn payload_type(&self) -> TypeId;

    fn payload_name(&self) -> &'static str;

    /// Handle a decoded payload.
    fn call(&self, conn: &Arc<Connection>, payload: AnyPayload) -> HandlerResult;
}

/// Wrapper that downcasts the payload before calling the handler.
pub struct TypedHandler<F, P>
where
    F: Fn(&Arc<Connection>, P) -> HandlerResult + Send + Sync + 'static,
    P: Packet,
{
    handler: F,
    _phantom: PhantomData<fn(P)>,
}

impl<F, P> TypedHandler<F, P>
where
    F: Fn(&Arc<Connection>, P) -> HandlerResult + Send + Sync + 'static,
    P: Packet,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, P> Handler for TypedHandler<F, P>
where
    F: Fn(&Arc<Connection>, P) -> HandlerResult + Send + Sync + 'static,
    P: Packet,
{
    fn payload_type(&self) -> TypeId {
        TypeId::of::<P>()
    }

    fn payload_name(&self) -> &'static str {
        P::NAME
    }

    fn call(&self, conn: &Arc<Connection>, payload: AnyPayload) -> HandlerResult {
        match payload.downcast::<P>() {
            Ok(payload) => (self.handler)(conn, *payload),
            Err(_) => Err(ProtocolError::InvalidSchema {
                packet: P::NAME,
                reason: "decoded payload has a different type".into(),
            }),
        }
    }
}

/// Registry mapping logical ids to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<PacketId, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `P::ID`.
    pub fn register<P, F>(&mut self, handler: F) -> Result<()>
    where
        P: Packet,
        F: Fn(&Arc<Connection>, P) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_boxed(P::ID, Box::new(TypedHandler::new(handler)))
    }

    /// Register an already boxed handler.
    pub fn register_boxed(&mut self, id: PacketId, handler: Box<dyn Handler>) -> Result<()> {
        if self.handlers.contains_key(&id) {
            return Err(ProtocolError::DuplicateHandler(id));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    pub fn get(&self, id: PacketId) -> Option<&dyn Handler> {
        self.handlers.get(&id).map(|h| h.as_ref())
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Ids that have a handler.
    pub fn ids(&self) -> impl Iterator<Item = PacketId> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Check every handler against the payload type registered for its id.
    pub fn validate(&self, registry: &ProtocolRegistry) -> Result<()> {
        for (&id, handler) in &self.handlers {
            match registry.by_id(id) {
                Some(def) if def.type_id == handler.payload_type() => {}
                _ => {
                    return Err(ProtocolError::UnregisteredPacket {
                        packet: handler.payload_name(),
                        state: id.state(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Dispatch a decoded payload to the handler for `id`.
    pub fn dispatch(
        &self,
        id: PacketId,
        conn: &Arc<Connection>,
        payload: AnyPayload,
    ) -> HandlerResult {
        let handler = self.get(id).ok_or(ProtocolError::HandlerNotFound(id))?;
        handler.call(conn, payload)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().collect();
        ids.sort();
        f.debug_struct("HandlerRegistry").field("ids", &ids).finish()
    }
}
