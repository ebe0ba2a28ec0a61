use wran_core::{Cid, Sfid, SsId};

use crate::ss_record::{MacAddress, SsRecord};

/// Registry of subscriber station records, in registration order.
#[derive(Debug, Default)]
pub struct SsManager {
    records: Vec<SsRecord>,
}

impl SsManager {
    pub fn new() -> SsManager {
        SsManager::default()
    }

    pub fn register(&mut self, record: SsRecord) -> SsId {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, ss_id: SsId) -> Option<&SsRecord> {
        self.records.get(ss_id)
    }

    pub fn get_mut(&mut self, ss_id: SsId) -> Option<&mut SsRecord> {
        self.records.get_mut(ss_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SsId, &SsRecord)> {
        self.records.iter().enumerate()
    }

    /// Find a station by one of its management connection identifiers
    pub fn by_cid(&self, cid: Cid) -> Option<SsId> {
        self.records
            .iter()
            .position(|r| r.basic_cid == cid || r.primary_cid == cid)
    }

    pub fn by_mac(&self, mac: MacAddress) -> Option<SsId> {
        self.records.iter().position(|r| r.mac_address == mac)
    }

    /// Find the station owning a service flow
    pub fn by_service_flow(&self, sfid: Sfid) -> Option<SsId> {
        self.records
            .iter()
            .position(|r| r.service_flows.contains(&sfid))
    }

    pub fn is_registered(&self, mac: MacAddress) -> bool {
        self.by_mac(mac).is_some()
    }
}
