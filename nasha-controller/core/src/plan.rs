//! Pure planning of access list changes.
//!
//! A plan is computed from the desired host blocks (the members) and the blocks the store
//! currently holds. A wider block is never desired, so it is always stale. Grants follow the
//! order of `desired`; revocations follow the order of `present`.

use ahash::AHashSet as HashSet;
use ipnet::IpNet;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub grant: Vec<IpNet>,
    pub revoke: Vec<IpNet>,
}

impl Plan {
    /// Grants every desired address that has no entry.
    pub fn grant_missing(desired: &[IpNet], present: &[IpNet]) -> Self {
        Self {
            grant: difference(desired, present),
            revoke: vec![],
        }
    }

    /// Revokes every entry whose address is not desired.
    pub fn revoke_stale(desired: &[IpNet], present: &[IpNet]) -> Self {
        Self {
            grant: vec![],
            revoke: difference(present, desired),
        }
    }

    /// Makes the access list hold exactly the desired addresses.
    pub fn converge(desired: &[IpNet], present: &[IpNet]) -> Self {
        Self {
            grant: difference(desired, present),
            revoke: difference(present, desired),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }
}

/// Returns the blocks of `from` not in `other`, without duplicates.
fn difference(from: &[IpNet], other: &[IpNet]) -> Vec<IpNet> {
    let other = other.iter().collect::<HashSet<_>>();
    let mut seen = HashSet::new();
    from.iter()
        .filter(|addr| !other.contains(addr) && seen.insert(**addr))
        .copied()
        .collect()
}
