use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::types::{ConnId, RoomCode, ServerMsg};

/// Outbound queue of one connection, drained by its WebSocket task.
pub type ConnSender = mpsc::UnboundedSender<ServerMsg>;

/// Live connections and the rooms they are attached to at the transport level.
///
/// Membership here is a best-effort mirror of the room store: the socket
/// layer detaches a connection as soon as it closes, before the coordinator
/// has reconciled the departure.
#[derive(Default)]
pub struct Hub {
    /// conn_id -> outbound queue
    conns: DashMap<ConnId, ConnSender>,
    /// room_code -> attached connections
    rooms: DashMap<RoomCode, HashSet<ConnId>>,
    /// conn_id -> room it is attached to
    joined: DashMap<ConnId, RoomCode>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, conn_id: &str) -> mpsc::UnboundedReceiver<ServerMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns.insert(conn_id.to_string(), tx);
        rx
    }

    /// Forgets a closed connection and detaches it from its room.
    pub fn unregister(&self, conn_id: &str) {
        self.conns.remove(conn_id);
        if let Some((_, code)) = self.joined.remove(conn_id) {
            self.detach(&code, conn_id);
        }
    }

    /// Attaches a connection to `code`, leaving any room it was attached to before.
    pub fn join(&self, code: &str, conn_id: &str) {
        let previous = self.joined.insert(conn_id.to_string(), code.to_string());
        if let Some(previous) = previous.filter(|prev| prev.as_str() != code) {
            self.detach(&previous, conn_id);
        }
        self.rooms
            .entry(code.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub fn drop_room(&self, code: &str) {
        if let Some((_, members)) = self.rooms.remove(code) {
            for conn_id in members {
                self.joined.remove_if(&conn_id, |_, joined| joined.as_str() == code);
            }
        }
    }

    fn detach(&self, code: &str, conn_id: &str) {
        if let Some(mut members) = self.rooms.get_mut(code) {
            members.remove(conn_id);
        }
        self.rooms.remove_if(code, |_, members| members.is_empty());
    }

    #[cfg(test)]
    pub fn room_of(&self, conn_id: &str) -> Option<RoomCode> {
        self.joined.get(conn_id).map(|code| code.clone())
    }

    /// Connections attached to `code` right now.
    pub fn members(&self, code: &str) -> Vec<ConnId> {
        self.rooms
            .get(code)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn send_to(&self, conn_id: &str, msg: ServerMsg) {
        if let Some(tx) = self.conns.get(conn_id) {
            let _ = tx.send(msg);
        }
    }

    pub fn broadcast(&self, code: &str, msg: ServerMsg) {
        self.broadcast_filtered(code, None, msg);
    }

    pub fn broadcast_except(&self, code: &str, exclude: &str, msg: ServerMsg) {
        self.broadcast_filtered(code, Some(exclude), msg);
    }

    fn broadcast_filtered(&self, code: &str, exclude: Option<&str>, msg: ServerMsg) {
        // Collect first so no room shard lock is held while touching conns.
        let targets = self.members(code);
        for conn_id in targets {
            if Some(conn_id.as_str()) == exclude {
                continue;
            }
            self.send_to(&conn_id, msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left(name: &str) -> ServerMsg {
        ServerMsg::MemberLeft {
            name: name.to_string(),
        }
    }

    #[test]
    fn broadcast_reaches_room_members_only() {
        let hub = Hub::new();
        let mut a = hub.register("a");
        let mut b = hub.register("b");
        let mut c = hub.register("c");
        hub.join("R1", "a");
        hub.join("R1", "b");
        hub.join("R2", "c");

        hub.broadcast("R1", left("x"));
        assert_eq!(a.try_recv().unwrap(), left("x"));
        assert_eq!(b.try_recv().unwrap(), left("x"));
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn broadcast_except_skips_sender() {
        let hub = Hub::new();
        let mut a = hub.register("a");
        let mut b = hub.register("b");
        hub.join("R1", "a");
        hub.join("R1", "b");

        hub.broadcast_except("R1", "a", left("x"));
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap(), left("x"));
    }

    #[test]
    fn unregister_detaches_from_rooms() {
        let hub = Hub::new();
        let _a = hub.register("a");
        let _b = hub.register("b");
        hub.join("R1", "a");
        hub.join("R2", "b");

        hub.unregister("a");
        assert!(hub.members("R1").is_empty());
        assert!(!hub.rooms.contains_key("R1"));
        assert_eq!(hub.room_of("a"), None);
        assert_eq!(hub.members("R2"), vec!["b".to_string()]);

        // Sending to a closed connection is silently dropped.
        hub.send_to("a", left("x"));
        hub.unregister("a");
    }

    #[test]
    fn unregister_leaves_other_rooms_untouched() {
        let hub = Hub::new();
        let _a = hub.register("a");
        let _b = hub.register("b");
        let _c = hub.register("c");
        hub.join("R1", "a");
        hub.join("R1", "b");
        hub.join("R2", "c");

        hub.unregister("a");
        assert_eq!(hub.members("R1"), vec!["b".to_string()]);
        assert_eq!(hub.members("R2"), vec!["c".to_string()]);
        assert_eq!(hub.room_of("b"), Some("R1".to_string()));
        assert_eq!(hub.joined.len(), 2);
    }

    #[test]
    fn joining_another_room_moves_the_connection() {
        let hub = Hub::new();
        let _a = hub.register("a");
        hub.join("R1", "a");
        hub.join("R2", "a");

        assert!(hub.members("R1").is_empty());
        assert_eq!(hub.members("R2"), vec!["a".to_string()]);
        assert_eq!(hub.room_of("a"), Some("R2".to_string()));
    }

    #[test]
    fn dropped_room_forgets_its_connections() {
        let hub = Hub::new();
        let _a = hub.register("a");
        let _b = hub.register("b");
        hub.join("R1", "a");
        hub.join("R2", "b");

        hub.drop_room("R1");
        assert_eq!(hub.room_of("a"), None);
        assert_eq!(hub.room_of("b"), Some("R2".to_string()));
        hub.unregister("a");
        assert_eq!(hub.members("R2"), vec!["b".to_string()]);
    }

    #[test]
    fn dropped_receiver_does_not_break_broadcast() {
        let hub = Hub::new();
        let a = hub.register("a");
        let mut b = hub.register("b");
        hub.join("R1", "a");
        hub.join("R1", "b");
        drop(a);

        hub.broadcast("R1", left("x"));
        assert_eq!(b.try_recv().unwrap(), left("x"));
    }
}
