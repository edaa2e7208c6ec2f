//! Grant reconciliation
//!
//! A port that is already public grants nothing extra to an individual
//! address; emitting both rules is pure overhead in the hot packet path.
//! Reconciliation strips the redundancy before compilation.

use crate::core::sources::{AddressGrants, PublicPorts};

/// Removes ports covered by the public-port set from each address grant.
///
/// Addresses are retained even when their port set empties; the compiler
/// simply emits nothing for them. Pure and total: never fails, and
/// reconciling an already-reconciled map against the same public set is a
/// no-op.
pub fn reconcile(grants: &AddressGrants, public: &PublicPorts) -> AddressGrants {
    grants
        .iter()
        .map(|(addr, ports)| {
            let kept = ports
                .iter()
                .copied()
                .filter(|port| !public.contains(*port))
                .collect();
            (*addr, kept)
        })
        .collect()
}
