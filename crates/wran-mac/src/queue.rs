use std::collections::VecDeque;

use crate::bandwidth_manager::BandwidthRequest;

/// Generic MAC header carried by every transmitted packet
pub const GENERIC_MAC_HEADER_BYTES: u32 = 6;

/// Subheader prepended to every fragment of a fragmented packet
pub const FRAGMENT_SUBHEADER_BYTES: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum MacPacketKind {
    /// User traffic; the scheduler only cares about its size
    Data,
    /// Management signalling (ranging responses, descriptors, ...)
    Management,
    /// A bandwidth request travelling on a signalling connection
    BandwidthRequest(BandwidthRequest),
}

/// A packet as the scheduler sees it: a kind and a payload byte count.
/// Wire layout is out of scope; only byte accounting matters here.
#[derive(Debug, Clone, PartialEq)]
pub struct MacPacket {
    pub kind: MacPacketKind,
    pub len_bytes: u32,
}

impl MacPacket {
    pub fn data(len_bytes: u32) -> MacPacket {
        MacPacket { kind: MacPacketKind::Data, len_bytes }
    }

    pub fn management(len_bytes: u32) -> MacPacket {
        MacPacket { kind: MacPacketKind::Management, len_bytes }
    }
}

#[derive(Debug, Clone)]
struct QueuedPacket {
    packet: MacPacket,
    /// Bytes of this packet already transmitted in earlier fragments
    sent_bytes: u32,
}

impl QueuedPacket {
    fn remaining(&self) -> u32 {
        self.packet.len_bytes - self.sent_bytes
    }

    fn is_fragmenting(&self) -> bool {
        self.sent_bytes > 0
    }

    /// Header bytes the next transmission of this packet will carry
    fn header_bytes(&self) -> u32 {
        if self.is_fragmenting() {
            GENERIC_MAC_HEADER_BYTES + FRAGMENT_SUBHEADER_BYTES
        } else {
            GENERIC_MAC_HEADER_BYTES
        }
    }
}

/// Ordered per-connection FIFO of packets awaiting transmission, with the
/// byte-accounting helpers the schedulers need.
#[derive(Debug, Default)]
pub struct MacQueue {
    queue: VecDeque<QueuedPacket>,
    pub bytes_enqueued: u64,
    pub bytes_dequeued: u64,
}

impl MacQueue {
    pub fn new() -> MacQueue {
        MacQueue::default()
    }

    pub fn enqueue(&mut self, packet: MacPacket) {
        self.bytes_enqueued += packet.len_bytes as u64;
        self.queue.push_back(QueuedPacket { packet, sent_bytes: 0 });
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn has_packets(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn peek(&self) -> Option<&MacPacket> {
        self.queue.front().map(|q| &q.packet)
    }

    /// Header overhead of the head packet's next transmission
    pub fn first_packet_header_bytes(&self) -> u32 {
        self.queue.front().map_or(0, |q| q.header_bytes())
    }

    /// Bytes required to transmit the (remainder of the) head packet,
    /// including MAC overhead
    pub fn first_packet_required_bytes(&self) -> u32 {
        self.queue.front().map_or(0, |q| q.remaining() + q.header_bytes())
    }

    /// Total queued bytes including per-packet MAC overhead.
    /// This is the quantity a bandwidth request asks for.
    pub fn queue_length_with_overhead(&self) -> u32 {
        self.queue.iter().map(|q| q.remaining() + q.header_bytes()).sum()
    }

    /// Dequeue the head packet whole. If the packet was partially sent as
    /// fragments before, the returned packet is the final fragment.
    pub fn dequeue(&mut self) -> Option<MacPacket> {
        let q = self.queue.pop_front()?;
        let remaining = q.remaining();
        self.bytes_dequeued += remaining as u64;
        Some(MacPacket { kind: q.packet.kind, len_bytes: remaining })
    }

    /// Dequeue at most `max_bytes` (including MAC overhead) of the head
    /// packet. A partial dequeue leaves the remainder at the head of the
    /// queue; the final fragment removes the packet.
    /// Returns None when the byte allowance cannot carry any payload.
    pub fn dequeue_fragment(&mut self, max_bytes: u32) -> Option<MacPacket> {
        let q = self.queue.front_mut()?;

        let overhead = GENERIC_MAC_HEADER_BYTES + FRAGMENT_SUBHEADER_BYTES;
        let payload = max_bytes.saturating_sub(overhead).min(q.remaining());
        if payload == 0 {
            return None;
        }

        if payload == q.remaining() {
            // Final fragment
            return self.dequeue();
        }

        q.sent_bytes += payload;
        let kind = q.packet.kind.clone();
        self.bytes_dequeued += payload as u64;
        Some(MacPacket { kind, len_bytes: payload })
    }
}
