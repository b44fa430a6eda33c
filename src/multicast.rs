//! Multicast group address allocation.
//!
//! A [`MulticastAddressPool`] hands out dotted-quad group addresses with
//! exclusive-until-released semantics: no two holders ever see the same
//! address at the same time, under any interleaving of concurrent
//! `get_address` / `release` calls. The candidate-selection algorithm is a
//! pluggable [`AddressPolicy`]; the held-set check and the claim happen
//! under one mutex, so the policy itself needs no synchronization.
//!
//! The pool is an explicitly constructed object: the server builds one at
//! startup and shares it (`Arc`) with every session that starts multicast.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use parking_lot::Mutex;
use rand::RngExt;

/// Consecutive colliding candidates tolerated before reporting exhaustion.
const MAX_PROBES: usize = 256;

/// Pluggable candidate-address generator.
///
/// Implementations only propose candidates; the pool filters out addresses
/// currently held. Candidates should fall in the administratively scoped
/// 239.0.0.0/8 block (RFC 2365).
pub trait AddressPolicy: Send {
    fn next_candidate(&mut self) -> Ipv4Addr;
}

/// Draws uniformly from 239.x.y.z (z in 1..=254). The default policy.
#[derive(Debug, Default)]
pub struct RandomPolicy;

impl AddressPolicy for RandomPolicy {
    fn next_candidate(&mut self) -> Ipv4Addr {
        let mut rng = rand::rng();
        Ipv4Addr::new(
            239,
            rng.random_range(0..=255),
            rng.random_range(0..=255),
            rng.random_range(1..=254),
        )
    }
}

/// Walks 239.0.0.0/8 in order, skipping .0 and .255 last octets, wrapping
/// at the end of the block.
#[derive(Debug)]
pub struct SequentialPolicy {
    next: u32,
}

impl SequentialPolicy {
    pub fn new() -> Self {
        Self::starting_at(Ipv4Addr::new(239, 0, 0, 1))
    }

    pub fn starting_at(addr: Ipv4Addr) -> Self {
        Self {
            next: u32::from(addr),
        }
    }
}

impl Default for SequentialPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressPolicy for SequentialPolicy {
    fn next_candidate(&mut self) -> Ipv4Addr {
        loop {
            let candidate = Ipv4Addr::from(self.next);
            self.next = if self.next >= u32::from(Ipv4Addr::new(239, 255, 255, 254)) {
                u32::from(Ipv4Addr::new(239, 0, 0, 1))
            } else {
                self.next + 1
            };
            let last = candidate.octets()[3];
            if last != 0 && last != 255 {
                return candidate;
            }
        }
    }
}

struct PoolState {
    policy: Box<dyn AddressPolicy>,
    held: HashSet<String>,
}

/// Process-wide allocator of multicast group addresses.
pub struct MulticastAddressPool {
    state: Mutex<PoolState>,
}

impl MulticastAddressPool {
    /// Pool with the default [`RandomPolicy`].
    pub fn new() -> Self {
        Self::with_policy(Box::new(RandomPolicy))
    }

    pub fn with_policy(policy: Box<dyn AddressPolicy>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                policy,
                held: HashSet::new(),
            }),
        }
    }

    /// Claim an address distinct from every address currently held.
    ///
    /// Candidate selection and the claim are one atomic step. Fails with
    /// [`AddressExhausted`](crate::MediaError::AddressExhausted) after 256
    /// consecutive candidates collide with held addresses.
    pub fn get_address(&self) -> crate::Result<String> {
        let mut state = self.state.lock();
        for _ in 0..MAX_PROBES {
            let candidate = state.policy.next_candidate().to_string();
            if state.held.insert(candidate.clone()) {
                tracing::trace!(addr = %candidate, held = state.held.len(), "multicast address claimed");
                return Ok(candidate);
            }
        }
        tracing::warn!(held = state.held.len(), "multicast address space exhausted");
        Err(crate::MediaError::AddressExhausted)
    }

    /// Return an address to the available set. Releasing an address that is
    /// not held is a no-op.
    pub fn release(&self, addr: &str) {
        if self.state.lock().held.remove(addr) {
            tracing::trace!(%addr, "multicast address released");
        }
    }

    /// Number of addresses currently held. Advisory.
    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }
}

impl Default for MulticastAddressPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn addresses_are_pairwise_distinct() {
        let pool = MulticastAddressPool::new();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(pool.get_address().unwrap()));
        }
        assert_eq!(pool.held_count(), 64);
    }

    #[test]
    fn concurrent_claims_never_collide() {
        let pool = Arc::new(MulticastAddressPool::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    (0..16)
                        .map(|_| pool.get_address().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for addr in handle.join().unwrap() {
                assert!(seen.insert(addr), "same address claimed twice");
            }
        }
        assert_eq!(pool.held_count(), 8 * 16);
    }

    #[test]
    fn released_address_becomes_claimable_again() {
        let pool = MulticastAddressPool::with_policy(Box::new(SequentialPolicy::new()));
        let first = pool.get_address().unwrap();
        pool.release(&first);
        assert_eq!(pool.held_count(), 0);

        let policy = SequentialPolicy::starting_at(first.parse().unwrap());
        let pool2 = MulticastAddressPool::with_policy(Box::new(policy));
        assert_eq!(pool2.get_address().unwrap(), first);
    }

    #[test]
    fn release_of_unheld_address_is_noop() {
        let pool = MulticastAddressPool::new();
        pool.release("239.1.2.3");
        assert_eq!(pool.held_count(), 0);
    }

    /// Policy that only ever proposes one address. Exhausts immediately
    /// once that address is held.
    struct OneAddressPolicy(Ipv4Addr);

    impl AddressPolicy for OneAddressPolicy {
        fn next_candidate(&mut self) -> Ipv4Addr {
            self.0
        }
    }

    #[test]
    fn exhaustion_is_reported() {
        let pool =
            MulticastAddressPool::with_policy(Box::new(OneAddressPolicy("239.9.9.9".parse().unwrap())));
        let addr = pool.get_address().unwrap();
        assert_eq!(addr, "239.9.9.9");
        assert!(matches!(
            pool.get_address(),
            Err(crate::MediaError::AddressExhausted)
        ));

        pool.release(&addr);
        assert!(pool.get_address().is_ok(), "release must make the address claimable");
    }

    #[test]
    fn sequential_policy_skips_zero_and_broadcast_octets() {
        let mut policy = SequentialPolicy::starting_at(Ipv4Addr::new(239, 0, 0, 254));
        assert_eq!(policy.next_candidate(), Ipv4Addr::new(239, 0, 0, 254));
        assert_eq!(policy.next_candidate(), Ipv4Addr::new(239, 0, 1, 1));
    }

    #[test]
    fn random_policy_stays_in_scoped_block() {
        let mut policy = RandomPolicy;
        for _ in 0..256 {
            let addr = policy.next_candidate();
            assert_eq!(addr.octets()[0], 239);
            assert_ne!(addr.octets()[3], 0);
            assert_ne!(addr.octets()[3], 255);
        }
    }
}
