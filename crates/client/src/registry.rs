//! Handler registry: subscriber callbacks keyed by event category or
//! message type.
//!
//! The registry is owned by each client instance, not module-global, so
//! independent clients can coexist in tests. Dispatch snapshots the handler
//! list (Arc clones) before invoking anything, which lets a callback
//! register or remove handlers without deadlocking.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use gridfall_protocol::{CloseInfo, Envelope};

use crate::error::ClientError;

pub(crate) type ConnectHandler = Arc<dyn Fn() + Send + Sync>;
pub(crate) type DisconnectHandler = Arc<dyn Fn(&CloseInfo) + Send + Sync>;
pub(crate) type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;
pub(crate) type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;
pub(crate) type PayloadHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque subscription token returned by the `on_*` methods.
///
/// Pass it to [`crate::GameClient::off`] to remove the subscription. Tokens
/// are unique per registration, so registering the same closure twice yields
/// two independent subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: u64,
    connect: Vec<(HandlerId, ConnectHandler)>,
    disconnect: Vec<(HandlerId, DisconnectHandler)>,
    error: Vec<(HandlerId, ErrorHandler)>,
    message: Vec<(HandlerId, MessageHandler)>,
    typed: HashMap<String, Vec<(HandlerId, PayloadHandler)>>,
}

impl HandlerRegistry {
    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    pub fn add_connect(&mut self, handler: ConnectHandler) -> HandlerId {
        let id = self.next_id();
        self.connect.push((id, handler));
        id
    }

    pub fn add_disconnect(&mut self, handler: DisconnectHandler) -> HandlerId {
        let id = self.next_id();
        self.disconnect.push((id, handler));
        id
    }

    pub fn add_error(&mut self, handler: ErrorHandler) -> HandlerId {
        let id = self.next_id();
        self.error.push((id, handler));
        id
    }

    pub fn add_message(&mut self, handler: MessageHandler) -> HandlerId {
        let id = self.next_id();
        self.message.push((id, handler));
        id
    }

    pub fn add_typed(&mut self, kind: String, handler: PayloadHandler) -> HandlerId {
        let id = self.next_id();
        self.typed.entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a subscription. Returns `false` (a silent no-op) when the id
    /// is not currently registered.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        macro_rules! remove_from {
            ($list:expr) => {{
                let before = $list.len();
                $list.retain(|(hid, _)| *hid != id);
                if $list.len() != before {
                    return true;
                }
            }};
        }

        remove_from!(self.connect);
        remove_from!(self.disconnect);
        remove_from!(self.error);
        remove_from!(self.message);
        for handlers in self.typed.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            if handlers.len() != before {
                return true;
            }
        }
        false
    }

    pub fn connect_handlers(&self) -> Vec<ConnectHandler> {
        self.connect.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn disconnect_handlers(&self) -> Vec<DisconnectHandler> {
        self.disconnect.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn error_handlers(&self) -> Vec<ErrorHandler> {
        self.error.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn message_handlers(&self) -> Vec<MessageHandler> {
        self.message.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn typed_handlers(&self, kind: &str) -> Vec<PayloadHandler> {
        self.typed
            .get(kind)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }
}
