use crate::constants::MAX_SEND_OPERATIONS;
use crate::core_transfer::operation::SendOperation;

/// Fixed table of in-flight uploads, indexed by slot id.
pub struct SendQueue<'a> {
    slots: [Option<SendOperation<'a>>; MAX_SEND_OPERATIONS],
    next_sequence: u64,
}

impl<'a> SendQueue<'a> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            next_sequence: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        MAX_SEND_OPERATIONS
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Stores `operation` in the given free slot and stamps it with its enqueue order.
    pub fn insert_at(&mut self, slot: usize, mut operation: SendOperation<'a>) {
        debug_assert!(self.slots[slot].is_none(), "slot {} already in use", slot);
        operation.set_sequence(self.next_sequence);
        self.next_sequence += 1;
        self.slots[slot] = Some(operation);
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut SendOperation<'a>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn take(&mut self, slot: usize) -> Option<SendOperation<'a>> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// The earliest-enqueued operation that has no data channel yet.
    ///
    /// `STOR` commands are staged in enqueue order, so this is the upload the server's next
    /// `150` refers to.
    pub fn next_awaiting_channel(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, op)| op.as_ref().map(|op| (slot, op)))
            .filter(|(_, op)| op.awaits_channel())
            .min_by_key(|(_, op)| op.sequence())
            .map(|(slot, _)| slot)
    }

    /// Slot ids with an open data channel, in table order.
    pub fn streaming_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, op)| op.as_ref().is_some_and(|op| !op.awaits_channel()))
            .map(|(slot, _)| slot)
    }

    /// Drops every operation without invoking its callback.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

impl Default for SendQueue<'_> {
    fn default() -> Self {
        Self::new()
    }
}
