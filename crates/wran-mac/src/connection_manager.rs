use wran_core::{Cid, CidFactory, CidType};

use crate::connection::Connection;
use crate::service_flow::SchedulingType;
use crate::service_flow_manager::ServiceFlowManager;
use crate::ss_record::SsRecord;

/// Owns the authoritative set of connections, indexed by class and by
/// identifier. The fixed broadcast and initial-ranging connections exist from
/// construction; everything else is created on registration/negotiation.
#[derive(Debug)]
pub struct ConnectionManager {
    cid_factory: CidFactory,
    broadcast: Connection,
    initial_ranging: Connection,
    basic: Vec<Connection>,
    primary: Vec<Connection>,
    transport: Vec<Connection>,
    multicast: Vec<Connection>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> ConnectionManager {
        ConnectionManager {
            cid_factory: CidFactory::new(),
            broadcast: Connection::new(Cid::broadcast(), CidType::Broadcast),
            initial_ranging: Connection::new(Cid::initial_ranging(), CidType::InitialRanging),
            basic: Vec::new(),
            primary: Vec::new(),
            transport: Vec::new(),
            multicast: Vec::new(),
        }
    }

    /// Create and register a connection of the given class.
    /// Panics on Broadcast/InitialRanging: those are fixed, not created.
    pub fn create_connection(&mut self, cid_type: CidType) -> Cid {
        let cid = match cid_type {
            CidType::Basic | CidType::Primary | CidType::Multicast => {
                self.cid_factory.allocate(cid_type)
            }
            CidType::Transport => self.cid_factory.allocate_transport_or_secondary(),
            _ => panic!("create_connection: invalid connection type {:?}", cid_type),
        };
        let connection = Connection::new(cid, cid_type);
        match cid_type {
            CidType::Basic => self.basic.push(connection),
            CidType::Primary => self.primary.push(connection),
            CidType::Transport => self.transport.push(connection),
            CidType::Multicast => self.multicast.push(connection),
            _ => unreachable!(),
        }
        cid
    }

    /// Create the basic + primary management connection pair for a station
    /// completing ranging, and record the identifiers on its record.
    pub fn allocate_management_connections(&mut self, ss_record: &mut SsRecord) -> (Cid, Cid) {
        let basic = self.create_connection(CidType::Basic);
        let primary = self.create_connection(CidType::Primary);
        ss_record.basic_cid = basic;
        ss_record.primary_cid = primary;
        (basic, primary)
    }

    pub fn broadcast(&self) -> &Connection {
        &self.broadcast
    }

    pub fn broadcast_mut(&mut self) -> &mut Connection {
        &mut self.broadcast
    }

    pub fn initial_ranging(&self) -> &Connection {
        &self.initial_ranging
    }

    pub fn initial_ranging_mut(&mut self) -> &mut Connection {
        &mut self.initial_ranging
    }

    /// Look up a connection by identifier across the basic, primary and
    /// transport sets. A miss is an ordinary outcome during classification
    /// of received packets, not an error.
    pub fn get_connection(&self, cid: Cid) -> Option<&Connection> {
        self.basic
            .iter()
            .chain(self.primary.iter())
            .chain(self.transport.iter())
            .find(|c| c.cid() == cid)
    }

    pub fn get_connection_mut(&mut self, cid: Cid) -> Option<&mut Connection> {
        self.basic
            .iter_mut()
            .chain(self.primary.iter_mut())
            .chain(self.transport.iter_mut())
            .find(|c| c.cid() == cid)
    }

    /// All connections of one class, in registration order.
    /// Panics for classes without a registry (fixed connections).
    pub fn get_connections(&self, cid_type: CidType) -> &[Connection] {
        match cid_type {
            CidType::Basic => &self.basic,
            CidType::Primary => &self.primary,
            CidType::Transport => &self.transport,
            CidType::Multicast => &self.multicast,
            _ => panic!("get_connections: invalid connection type {:?}", cid_type),
        }
    }

    /// Identifiers of one class, in registration order
    pub fn cids(&self, cid_type: CidType) -> Vec<Cid> {
        self.get_connections(cid_type).iter().map(|c| c.cid()).collect()
    }

    /// Aggregate queue depth of one class. For transport connections an
    /// optional scheduling-type filter narrows the count to one class of
    /// service flows.
    pub fn get_n_packets(
        &self,
        cid_type: CidType,
        scheduling_filter: Option<SchedulingType>,
        flows: &ServiceFlowManager,
    ) -> u32 {
        match cid_type {
            CidType::Basic => self.basic.iter().map(|c| c.queue.len() as u32).sum(),
            CidType::Primary => self.primary.iter().map(|c| c.queue.len() as u32).sum(),
            CidType::Transport => self
                .transport
                .iter()
                .filter(|c| match scheduling_filter {
                    None => true,
                    Some(sched) => c
                        .service_flow
                        .and_then(|sfid| flows.get(sfid))
                        .is_some_and(|f| f.scheduling == sched),
                })
                .map(|c| c.queue.len() as u32)
                .sum(),
            _ => panic!("get_n_packets: invalid connection type {:?}", cid_type),
        }
    }

    /// True when any basic, primary or transport connection has queued packets
    pub fn has_packets(&self) -> bool {
        self.basic
            .iter()
            .chain(self.primary.iter())
            .chain(self.transport.iter())
            .any(|c| c.has_packets())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MacPacket;

    #[test]
    fn test_create_and_lookup() {
        let mut mgr = ConnectionManager::new();
        let b = mgr.create_connection(CidType::Basic);
        let p = mgr.create_connection(CidType::Primary);
        let t = mgr.create_connection(CidType::Transport);

        assert_ne!(b, p);
        assert_ne!(p, t);
        assert_eq!(mgr.get_connection(b).map(|c| c.cid_type()), Some(CidType::Basic));
        assert_eq!(mgr.get_connection(t).map(|c| c.cid_type()), Some(CidType::Transport));

        // Unknown identifiers miss without panicking
        assert!(mgr.get_connection(Cid::new(0x7777)).is_none());
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut mgr = ConnectionManager::new();
        let first = mgr.create_connection(CidType::Basic);
        let second = mgr.create_connection(CidType::Basic);
        let cids = mgr.cids(CidType::Basic);
        assert_eq!(cids, vec![first, second]);
    }

    #[test]
    fn test_has_packets() {
        let mut mgr = ConnectionManager::new();
        let b = mgr.create_connection(CidType::Basic);
        assert!(!mgr.has_packets());
        mgr.get_connection_mut(b).unwrap().enqueue(MacPacket::management(10));
        assert!(mgr.has_packets());

        // The broadcast queue is not part of the per-class registries
        let _ = mgr.get_connection_mut(b).unwrap().dequeue();
        mgr.broadcast_mut().enqueue(MacPacket::management(10));
        assert!(!mgr.has_packets());
        assert!(mgr.broadcast().has_packets());
    }
}
