//! IP-hash load balancing strategy (session affinity).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::schema::ModelInstance;
use crate::load_balancer::random::WeightedRandom;
use crate::load_balancer::{ensure_candidates, LoadBalancer, Strategy};
use crate::registry::DispatchError;

/// Stable digests usable for affinity hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Fnv1a,
}

impl HashAlgorithm {
    pub fn hash(&self, data: &[u8]) -> u64 {
        match self {
            HashAlgorithm::Sha256 => {
                let digest = Sha256::digest(data);
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                u64::from_be_bytes(prefix)
            }
            HashAlgorithm::Fnv1a => {
                let mut hash = 0xcbf29ce484222325u64;
                for &byte in data {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(0x100000001b3);
                }
                hash
            }
        }
    }
}

/// Maps a client key onto `hash(key) % candidates.len()`, ignoring weights.
/// Calls without a client key fall back to weighted random.
#[derive(Debug)]
pub struct IpHash {
    algorithm: HashAlgorithm,
    fallback: WeightedRandom,
}

impl IpHash {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            fallback: WeightedRandom::new(),
        }
    }
}

impl LoadBalancer for IpHash {
    fn select(
        &self,
        candidates: &[Arc<ModelInstance>],
        client_key: Option<&str>,
    ) -> Result<Arc<ModelInstance>, DispatchError> {
        ensure_candidates(candidates)?;

        match client_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => {
                let index = (self.algorithm.hash(key.as_bytes()) % candidates.len() as u64) as usize;
                Ok(candidates[index].clone())
            }
            None => self.fallback.select(candidates, None),
        }
    }

    fn strategy(&self) -> Strategy {
        Strategy::IpHash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::instance;

    fn backends() -> Vec<Arc<ModelInstance>> {
        vec![instance("a", 1), instance("b", 2), instance("c", 3)]
    }

    #[test]
    fn test_same_key_same_instance() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Fnv1a] {
            let lb = IpHash::new(algorithm);
            let backends = backends();
            let first = lb.select(&backends, Some("127.0.0.1")).unwrap();
            for _ in 0..50 {
                assert_eq!(lb.select(&backends, Some("127.0.0.1")).unwrap().name, first.name);
            }
        }
    }

    #[test]
    fn test_affinity_is_stable_across_balancers() {
        let backends = backends();
        let a = IpHash::new(HashAlgorithm::Sha256).select(&backends, Some("10.1.2.3")).unwrap();
        let b = IpHash::new(HashAlgorithm::Sha256).select(&backends, Some("10.1.2.3")).unwrap();
        assert_eq!(a.name, b.name);
    }

    #[test]
    fn test_missing_key_falls_back() {
        let lb = IpHash::new(HashAlgorithm::Sha256);
        let backends = backends();
        assert!(lb.select(&backends, None).is_ok());
        assert!(lb.select(&backends, Some("")).is_ok());
        assert!(lb.select(&backends, Some("   ")).is_ok());
    }

    #[test]
    fn test_keys_spread_over_candidates() {
        let lb = IpHash::new(HashAlgorithm::Fnv1a);
        let backends = backends();
        let distinct: std::collections::HashSet<String> = (0..64)
            .map(|i| lb.select(&backends, Some(&format!("10.0.0.{i}"))).unwrap().name.clone())
            .collect();
        assert!(distinct.len() > 1);
    }
}
