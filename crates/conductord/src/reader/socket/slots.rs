use std::os::unix::net::UnixStream;
use std::sync::Arc;

use conductor_protocol::ClientIdentifier;

use crate::reader::SocketWriter;

/// One accepted client.
#[derive(Debug)]
pub(super) struct ClientConnection {
    pub(super) stream: UnixStream,
    pub(super) client: ClientIdentifier,
    pub(super) writer: Arc<SocketWriter>,
}

/// Fixed-size table of client connections addressed by slot index.
#[derive(Debug)]
pub(super) struct ClientSlots {
    slots: Vec<Option<ClientConnection>>,
}

impl ClientSlots {
    pub(super) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub(super) const fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub(super) fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Stores `connection` in the first free slot.
    pub(super) fn insert(
        &mut self,
        connection: ClientConnection,
    ) -> Result<usize, ClientConnection> {
        match self.slots.iter_mut().enumerate().find(|(_, slot)| slot.is_none()) {
            Some((index, slot)) => {
                *slot = Some(connection);
                Ok(index)
            }
            None => Err(connection),
        }
    }

    pub(super) fn get_mut(&mut self, index: usize) -> Option<&mut ClientConnection> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub(super) fn release(&mut self, index: usize) -> Option<ClientConnection> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = (usize, &ClientConnection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|connection| (index, connection)))
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn connection() -> ClientConnection {
        let (stream, peer) = UnixStream::pair().expect("socket pair");
        let client = ClientIdentifier::new(1000, 10);
        ClientConnection {
            stream,
            client,
            writer: Arc::new(SocketWriter::new(client, peer)),
        }
    }

    #[rstest]
    fn fills_the_first_free_slot(
        #[from(connection)] first: ClientConnection,
        #[from(connection)] second: ClientConnection,
        #[from(connection)] third: ClientConnection,
    ) {
        let mut slots = ClientSlots::with_capacity(3);
        assert_eq!(slots.insert(first).ok(), Some(0));
        assert_eq!(slots.insert(second).ok(), Some(1));
        assert!(slots.release(0).is_some());

        assert_eq!(slots.insert(third).ok(), Some(0));
        assert_eq!(slots.len(), 2);
        assert_eq!(slots.iter().map(|(index, _)| index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[rstest]
    fn rejects_connections_when_full(
        #[from(connection)] first: ClientConnection,
        #[from(connection)] second: ClientConnection,
    ) {
        let mut slots = ClientSlots::with_capacity(1);
        assert_eq!(slots.insert(first).ok(), Some(0));
        assert!(slots.is_full());

        assert!(slots.insert(second).is_err());
        assert_eq!(slots.len(), 1);
        assert_eq!(slots.capacity(), 1);
    }

    #[rstest]
    fn releasing_an_empty_slot_is_harmless() {
        let mut slots = ClientSlots::with_capacity(2);
        assert!(slots.release(1).is_none());
        assert!(slots.release(9).is_none());
        assert!(slots.get_mut(0).is_none());
    }
}
