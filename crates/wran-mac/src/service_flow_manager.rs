use core::fmt;

use wran_core::Sfid;

use crate::service_flow::{DsaState, SchedulingType, ServiceFlow};

#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionError {
    /// The flow's fixed grant cannot fit the uplink subframe budget
    GrantExceedsFrameBudget { needed: u32, budget: u32 },
    FlowAlreadyEnabled,
    UnknownServiceFlow { sfid: Sfid },
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::GrantExceedsFrameBudget { needed, budget } => write!(
                f,
                "UGS grant of {} symbols exceeds the uplink subframe budget of {}",
                needed, budget
            ),
            AdmissionError::FlowAlreadyEnabled => write!(f, "service flow is already enabled"),
            AdmissionError::UnknownServiceFlow { sfid } => {
                write!(f, "unknown service flow {}", sfid)
            }
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Owns every service flow known to the device and drives the DSA
/// admission state machine.
///
/// The DSA handshake is timer-independent: an external retry timer calls
/// `dsa_timer_expired` on expiry, and the method performs the
/// retry-or-give-up transition.
#[derive(Debug, Default)]
pub struct ServiceFlowManager {
    flows: Vec<ServiceFlow>,
    next_sfid: Sfid,
}

impl ServiceFlowManager {
    pub fn new() -> ServiceFlowManager {
        ServiceFlowManager { flows: Vec::new(), next_sfid: 1 }
    }

    /// Register a flow in Requested state and hand out its identifier
    pub fn add(&mut self, mut flow: ServiceFlow) -> Sfid {
        let sfid = self.next_sfid;
        self.next_sfid += 1;
        flow.sfid = sfid;
        flow.dsa_state = DsaState::Requested;
        self.flows.push(flow);
        sfid
    }

    pub fn get(&self, sfid: Sfid) -> Option<&ServiceFlow> {
        self.flows.iter().find(|f| f.sfid == sfid)
    }

    pub fn get_mut(&mut self, sfid: Sfid) -> Option<&mut ServiceFlow> {
        self.flows.iter_mut().find(|f| f.sfid == sfid)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Identifiers of all flows of one scheduling class, in admission order
    pub fn flows_of_type(&self, scheduling: SchedulingType) -> Vec<Sfid> {
        self.flows
            .iter()
            .filter(|f| f.scheduling == scheduling)
            .map(|f| f.sfid)
            .collect()
    }

    pub fn all_sfids(&self) -> Vec<Sfid> {
        self.flows.iter().map(|f| f.sfid).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceFlow> {
        self.flows.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServiceFlow> {
        self.flows.iter_mut()
    }

    /// DSA-RSP received for a requested flow
    pub fn dsa_acked(&mut self, sfid: Sfid) {
        if let Some(flow) = self.get_mut(sfid) {
            if flow.dsa_state == DsaState::Requested {
                flow.dsa_state = DsaState::Acked;
            } else {
                tracing::warn!("dsa_acked: sfid {} in state {:?}, ignoring", sfid, flow.dsa_state);
            }
        }
    }

    /// Final DSA-ACK exchanged: the flow becomes schedulable
    pub fn admit(&mut self, sfid: Sfid) -> Result<(), AdmissionError> {
        let Some(flow) = self.get_mut(sfid) else {
            return Err(AdmissionError::UnknownServiceFlow { sfid });
        };
        if flow.is_enabled {
            return Err(AdmissionError::FlowAlreadyEnabled);
        }
        flow.dsa_state = DsaState::Admitted;
        flow.is_enabled = true;
        tracing::info!("admitted service flow {} ({})", sfid, flow.scheduling);
        Ok(())
    }

    /// Retry-or-give-up transition, called by the external DSA retry timer.
    /// Returns the state after the transition.
    pub fn dsa_timer_expired(&mut self, sfid: Sfid, max_retries: u8) -> DsaState {
        let Some(flow) = self.get_mut(sfid) else {
            tracing::warn!("dsa_timer_expired: unknown sfid {}", sfid);
            return DsaState::Abandoned;
        };
        match flow.dsa_state {
            DsaState::Requested | DsaState::Acked => {
                if flow.dsa_retries < max_retries {
                    flow.dsa_retries += 1;
                    tracing::debug!(
                        "DSA retry {}/{} for sfid {}",
                        flow.dsa_retries,
                        max_retries,
                        sfid
                    );
                } else {
                    flow.dsa_state = DsaState::Abandoned;
                    tracing::warn!(
                        "DSA retries exhausted for sfid {}, abandoning setup",
                        sfid
                    );
                }
            }
            // Admitted flows have no pending handshake; Abandoned is terminal
            DsaState::Admitted | DsaState::Abandoned => {}
        }
        flow.dsa_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wran_core::Direction;

    #[test]
    fn test_sfid_assignment_and_lookup() {
        let mut mgr = ServiceFlowManager::new();
        let a = mgr.add(ServiceFlow::new(Direction::Ul, SchedulingType::Rtps));
        let b = mgr.add(ServiceFlow::new(Direction::Ul, SchedulingType::Be));
        assert_ne!(a, b);
        assert_eq!(mgr.get(a).map(|f| f.scheduling), Some(SchedulingType::Rtps));
        assert_eq!(mgr.flows_of_type(SchedulingType::Be), vec![b]);
        assert!(mgr.get(999).is_none());
    }

    #[test]
    fn test_dsa_lifecycle() {
        let mut mgr = ServiceFlowManager::new();
        let sfid = mgr.add(ServiceFlow::new(Direction::Ul, SchedulingType::Nrtps));
        assert_eq!(mgr.get(sfid).map(|f| f.dsa_state), Some(DsaState::Requested));

        mgr.dsa_acked(sfid);
        assert_eq!(mgr.get(sfid).map(|f| f.dsa_state), Some(DsaState::Acked));

        mgr.admit(sfid).expect("admission");
        let flow = mgr.get(sfid).expect("flow");
        assert_eq!(flow.dsa_state, DsaState::Admitted);
        assert!(flow.is_enabled);
    }

    #[test]
    fn test_dsa_retries_to_abandoned() {
        let mut mgr = ServiceFlowManager::new();
        let sfid = mgr.add(ServiceFlow::new(Direction::Ul, SchedulingType::Rtps));

        // max_retries timer expiries keep retrying, the next one gives up
        for _ in 0..3 {
            assert_eq!(mgr.dsa_timer_expired(sfid, 3), DsaState::Requested);
        }
        assert_eq!(mgr.dsa_timer_expired(sfid, 3), DsaState::Abandoned);

        let flow = mgr.get(sfid).expect("flow");
        assert!(!flow.is_enabled, "abandoned flow must stay disabled");

        // Abandoned is terminal
        assert_eq!(mgr.dsa_timer_expired(sfid, 3), DsaState::Abandoned);
    }
}
