//! Per-connection records and the arena that owns them.
//!
//! Every accepted socket gets a slot in [`ConnectionArena`]. A [`ConnId`]
//! carries the slot's generation, so an id held by a late reply or a stale
//! event never resolves to a connection accepted later into the same slot.

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Generation-tagged connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    slot: u32,
    generation: u32,
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}.{}", self.slot, self.generation)
    }
}

/// Worker-side handle onto a live socket task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Frames queued for the socket's write loop.
    tx: mpsc::Sender<Bytes>,
    /// Cancelled to force the socket closed.
    shutdown: CancellationToken,
    peer: Option<SocketAddr>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<Bytes>, shutdown: CancellationToken, peer: Option<SocketAddr>) -> Self {
        Self { tx, shutdown, peer }
    }

    /// Queue a frame without waiting.
    /// Returns false if the outbound buffer is full or the socket is gone.
    pub fn push(&self, body: Bytes) -> bool {
        self.tx.try_send(body).is_ok()
    }

    /// Ask the socket task to close the connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Session attached to a connection once it has sent its session key.
#[derive(Debug, Clone)]
pub struct SessionData {
    session_id: String,
    online_time: i64,
    valid: bool,
}

impl SessionData {
    pub fn new(online_time: i64) -> Self {
        Self {
            session_id: String::new(),
            online_time,
            valid: false,
        }
    }

    /// Bind a verified session id.
    pub fn bind(&mut self, session_id: String) {
        self.session_id = session_id;
        self.valid = true;
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn online_time(&self) -> i64 {
        self.online_time
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Where a connection stands in the verification handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No session key received yet.
    Unauthenticated,
    /// Session key sent, no verified id bound.
    Pending,
    /// Verified session id bound.
    Authenticated,
}

/// Everything the gateway knows about one socket.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub handle: ConnectionHandle,
    /// Accept time, unix millis.
    pub accepted_at: i64,
    pub session: Option<SessionData>,
    /// Set once the gateway has force-closed the socket.
    pub closing: bool,
}

impl ConnectionRecord {
    pub fn new(handle: ConnectionHandle, accepted_at: i64) -> Self {
        Self {
            handle,
            accepted_at,
            session: None,
            closing: false,
        }
    }

    pub fn state(&self) -> ConnState {
        match &self.session {
            None => ConnState::Unauthenticated,
            Some(session) if session.is_valid() => ConnState::Authenticated,
            Some(_) => ConnState::Pending,
        }
    }

    /// Verified session id, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|s| s.is_valid())
            .map(|s| s.id())
    }
}

struct Slot {
    generation: u32,
    record: Option<ConnectionRecord>,
}

/// Slab of connection records addressed by [`ConnId`].
#[derive(Default)]
pub struct ConnectionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ConnectionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ConnectionRecord) -> ConnId {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.record = Some(record);
            return ConnId {
                slot,
                generation: entry.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            record: Some(record),
        });
        ConnId { slot, generation: 0 }
    }

    pub fn get(&self, id: ConnId) -> Option<&ConnectionRecord> {
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.record.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut ConnectionRecord> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.record.as_mut())
    }

    /// Remove a record; its slot is reused under the next generation.
    pub fn remove(&mut self, id: ConnId) -> Option<ConnectionRecord> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.len -= 1;
        Some(record)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ConnectionRecord {
        let (tx, _rx) = mpsc::channel(1);
        ConnectionRecord::new(ConnectionHandle::new(tx, CancellationToken::new(), None), 0)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut arena = ConnectionArena::new();
        let a = arena.insert(record());
        let b = arena.insert(record());
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);

        assert!(arena.remove(a).is_some());
        assert!(!arena.contains(a));
        assert!(arena.contains(b));
        assert_eq!(arena.len(), 1);
        assert!(arena.remove(a).is_none());
    }

    #[test]
    fn test_reused_slot_does_not_alias_old_id() {
        let mut arena = ConnectionArena::new();
        let old = arena.insert(record());
        arena.remove(old);

        let new = arena.insert(record());
        assert_ne!(old, new);
        assert!(arena.get(old).is_none());
        assert!(arena.get_mut(old).is_none());
        assert!(arena.remove(old).is_none());
        assert!(arena.contains(new));
    }

    #[test]
    fn test_connection_state() {
        let mut rec = record();
        assert_eq!(rec.state(), ConnState::Unauthenticated);
        assert_eq!(rec.session_id(), None);

        rec.session = Some(SessionData::new(42));
        assert_eq!(rec.state(), ConnState::Pending);
        assert_eq!(rec.session_id(), None);

        rec.session.as_mut().unwrap().bind("S1".to_string());
        assert_eq!(rec.state(), ConnState::Authenticated);
        assert_eq!(rec.session_id(), Some("S1"));
        assert_eq!(rec.session.as_ref().unwrap().online_time(), 42);
    }

    #[test]
    fn test_handle_push_and_close() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx, CancellationToken::new(), None);
        assert!(handle.push(Bytes::from_static(b"a")));
        assert!(!handle.push(Bytes::from_static(b"b")));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));

        assert!(!handle.is_closed());
        handle.close();
        assert!(handle.is_closed());
    }
}
