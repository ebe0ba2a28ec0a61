use wran_core::{Cid, CidType, Sfid};

use crate::queue::{MacPacket, MacQueue};

/// One logical traffic stream: an identity plus its transmission queue.
///
/// Transport and multicast connections carry a back-reference to the service
/// flow they belong to; the flow is owned by the service flow manager, never
/// by the connection.
#[derive(Debug)]
pub struct Connection {
    cid: Cid,
    cid_type: CidType,
    pub queue: MacQueue,
    /// Received fragments awaiting reassembly
    fragments: Vec<MacPacket>,
    pub service_flow: Option<Sfid>,
}

impl Connection {
    pub fn new(cid: Cid, cid_type: CidType) -> Connection {
        Connection {
            cid,
            cid_type,
            queue: MacQueue::new(),
            fragments: Vec::new(),
            service_flow: None,
        }
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn cid_type(&self) -> CidType {
        self.cid_type
    }

    pub fn has_packets(&self) -> bool {
        self.queue.has_packets()
    }

    pub fn enqueue(&mut self, packet: MacPacket) {
        self.queue.enqueue(packet);
    }

    pub fn dequeue(&mut self) -> Option<MacPacket> {
        self.queue.dequeue()
    }

    pub fn dequeue_fragment(&mut self, max_bytes: u32) -> Option<MacPacket> {
        self.queue.dequeue_fragment(max_bytes)
    }

    pub fn queue_length_with_overhead(&self) -> u32 {
        self.queue.queue_length_with_overhead()
    }

    pub fn fragment_enqueue(&mut self, fragment: MacPacket) {
        self.fragments.push(fragment);
    }

    pub fn fragments(&self) -> &[MacPacket] {
        &self.fragments
    }

    pub fn clear_fragments(&mut self) {
        self.fragments.clear();
    }
}
