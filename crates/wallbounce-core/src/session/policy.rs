//! Turn-indexed routing policy derivation.
//!
//! The canonical policy ramps the provider floor up over the first few
//! turns and rotates vendors between consecutive turns:
//!
//! - Turn 1: direct; no rotation constraint.
//! - Turn 2: floor 2, must differ from turn 1's vendors.
//! - Turn 3: floor 3, prefer vendors unused on turns 1 and 2.
//! - Turn >= 4: floor `max(3, min(cap, turn))`; rotation against the
//!   immediately preceding turn, preferred but not mandatory.
//!
//! Exclusions are enforced by the registry, which widens back to any
//! vendor (flagging `rotation_relaxed`) when the pool is too small. The
//! floors are configuration so tuning them never requires a code change.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::Session;

/// Configurable per-turn provider floors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFloors {
    /// Provider floor on turn 2.
    pub turn2_min_providers: usize,
    /// Provider floor on turn 3.
    pub turn3_min_providers: usize,
    /// Cap on the growing floor for turns 4 and beyond.
    pub turn_min_cap: usize,
}

impl Default for PolicyFloors {
    fn default() -> Self {
        Self {
            turn2_min_providers: 2,
            turn3_min_providers: 3,
            turn_min_cap: 4,
        }
    }
}

/// Routing constraints derived for the next turn of a session.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    /// The turn index this policy applies to.
    pub turn_index: u32,
    /// Floor on provider count for this turn.
    pub min_providers: usize,
    /// Vendors to rotate away from (registry widens when infeasible).
    pub must_differ_from: HashSet<String>,
}

/// Derive the routing policy for the next turn of `session`.
pub fn derive_policy(session: &Session, floors: &PolicyFloors) -> RoutingPolicy {
    let turn_index = session.turns.len() as u32 + 1;

    let (min_providers, must_differ_from) = match turn_index {
        1 => (2, HashSet::new()),
        2 => (floors.turn2_min_providers, last_turn_vendors(session, 1)),
        3 => {
            // Prefer a vendor unseen on turns 1 and 2.
            let mut used = last_turn_vendors(session, 1);
            used.extend(last_turn_vendors(session, 2));
            (floors.turn3_min_providers, used)
        }
        k => {
            let floor = (k as usize).min(floors.turn_min_cap).max(3);
            (floor, last_turn_vendors(session, k - 1))
        }
    };

    RoutingPolicy {
        turn_index,
        min_providers,
        must_differ_from,
    }
}

fn last_turn_vendors(session: &Session, turn_index: u32) -> HashSet<String> {
    session
        .turns
        .iter()
        .find(|t| t.turn_index == turn_index)
        .map(|t| t.vendors_used.iter().cloned().collect())
        .unwrap_or_default()
}
