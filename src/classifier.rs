use alloy_primitives::{Address, B256, Bytes, keccak256};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Something that can fetch the current bytecode of an account.
#[async_trait]
pub trait BytecodeSource: Send + Sync {
    async fn code_at(&self, address: Address) -> Result<Bytes>;
}

/// Capability to partition addresses by what lives at them on-chain.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, addresses: &[Address]) -> Classification;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Eoa,
    Contract(B256),
    SelfDestroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedContract {
    pub address: Address,
    pub code_hash: B256,
}

/// Disjoint partition of a classification batch. Addresses whose bytecode
/// could not be fetched land in `unclassified`, never in `eoas`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub eoas: Vec<Address>,
    pub contracts: Vec<ClassifiedContract>,
    pub self_destroyed: Vec<Address>,
    pub unclassified: Vec<Address>,
}

impl Classification {
    pub fn len(&self) -> usize {
        self.eoas.len() + self.contracts.len() + self.self_destroyed.len() + self.unclassified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, address: Address, kind: AccountKind) {
        match kind {
            AccountKind::Eoa => self.eoas.push(address),
            AccountKind::Contract(code_hash) => {
                self.contracts.push(ClassifiedContract { address, code_hash })
            }
            AccountKind::SelfDestroyed => self.self_destroyed.push(address),
        }
    }
}

/// Classifies one account's bytecode. Empty or all-zero code is an EOA.
pub fn classify_bytecode(code: &[u8], destroyed_code_hashes: &HashSet<B256>) -> AccountKind {
    if code.iter().all(|byte| *byte == 0) {
        return AccountKind::Eoa;
    }

    let code_hash = keccak256(code);
    if destroyed_code_hashes.contains(&code_hash) {
        AccountKind::SelfDestroyed
    } else {
        AccountKind::Contract(code_hash)
    }
}

pub struct BytecodeClassifier<S> {
    source: S,
    destroyed_code_hashes: HashSet<B256>,
    concurrency: usize,
    rounds: usize,
}

impl<S: BytecodeSource> BytecodeClassifier<S> {
    pub fn new(source: S, destroyed_code_hashes: impl IntoIterator<Item = B256>) -> Self {
        Self {
            source,
            destroyed_code_hashes: destroyed_code_hashes.into_iter().collect(),
            concurrency: 8,
            rounds: 3,
        }
    }

    /// Number of bytecode probes in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// How many times a failed probe is attempted before giving up.
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    async fn probe(&self, addresses: Vec<Address>) -> Vec<(Address, Result<Bytes>)> {
        stream::iter(addresses)
            .map(|address| async move { (address, self.source.code_at(address).await) })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

#[async_trait]
impl<S: BytecodeSource> Classifier for BytecodeClassifier<S> {
    async fn classify(&self, addresses: &[Address]) -> Classification {
        let mut seen = HashSet::new();
        let mut pending: Vec<Address> = addresses
            .iter()
            .copied()
            .filter(|address| seen.insert(*address))
            .collect();

        let mut classification = Classification::default();

        for round in 1..=self.rounds {
            if pending.is_empty() {
                break;
            }

            let mut failed = Vec::new();
            for (address, outcome) in self.probe(pending).await {
                match outcome {
                    Ok(code) => {
                        let kind = classify_bytecode(&code, &self.destroyed_code_hashes);
                        classification.push(address, kind);
                    }
                    Err(e) => {
                        debug!("Bytecode probe for {:?} failed (round {}): {}", address, round, e);
                        failed.push(address);
                    }
                }
            }

            if !failed.is_empty() && round < self.rounds {
                warn!(
                    "{} bytecode probes failed in round {}/{}, retrying",
                    failed.len(),
                    round,
                    self.rounds
                );
            }
            pending = failed;
        }

        for address in &pending {
            warn!(
                "Leaving {:?} unclassified: bytecode probe failed {} times",
                address, self.rounds
            );
        }
        classification.unclassified = pending;

        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed bytecode; addresses in `flaky` fail that many times first.
    struct StaticCode {
        code: HashMap<Address, Bytes>,
        flaky: Mutex<HashMap<Address, usize>>,
        calls: Mutex<Vec<Address>>,
    }

    impl StaticCode {
        fn new(code: &[(Address, &[u8])]) -> Self {
            Self {
                code: code
                    .iter()
                    .map(|(a, c)| (*a, Bytes::copy_from_slice(c)))
                    .collect(),
                flaky: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(self, address: Address, times: usize) -> Self {
            self.flaky.lock().unwrap().insert(address, times);
            self
        }

        fn calls_for(&self, address: Address) -> usize {
            self.calls.lock().unwrap().iter().filter(|a| **a == address).count()
        }
    }

    #[async_trait]
    impl BytecodeSource for StaticCode {
        async fn code_at(&self, address: Address) -> Result<Bytes> {
            self.calls.lock().unwrap().push(address);
            {
                let mut flaky = self.flaky.lock().unwrap();
                if let Some(remaining) = flaky.get_mut(&address) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        anyhow::bail!("connection reset");
                    }
                }
            }
            Ok(self.code.get(&address).cloned().unwrap_or_default())
        }
    }

    const EMPTY_CODE: &[u8] = &[];
    const CONTRACT_CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];
    const DESTROYED_CODE: &[u8] = &[0xfe];

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn sentinel() -> HashSet<B256> {
        HashSet::from([keccak256(DESTROYED_CODE)])
    }

    #[test]
    fn test_empty_and_zero_code_is_eoa() {
        assert_eq!(classify_bytecode(&[], &sentinel()), AccountKind::Eoa);
        assert_eq!(classify_bytecode(&[0, 0, 0], &sentinel()), AccountKind::Eoa);
    }

    #[test]
    fn test_contract_carries_code_hash() {
        assert_eq!(
            classify_bytecode(CONTRACT_CODE, &sentinel()),
            AccountKind::Contract(keccak256(CONTRACT_CODE))
        );
    }

    #[test]
    fn test_sentinel_hash_is_self_destroyed() {
        assert_eq!(
            classify_bytecode(DESTROYED_CODE, &sentinel()),
            AccountKind::SelfDestroyed
        );
        assert_eq!(
            classify_bytecode(DESTROYED_CODE, &HashSet::new()),
            AccountKind::Contract(keccak256(DESTROYED_CODE))
        );
    }

    #[tokio::test]
    async fn test_partitions_batch() {
        let source = StaticCode::new(&[
            (addr(1), EMPTY_CODE),
            (addr(2), CONTRACT_CODE),
            (addr(3), DESTROYED_CODE),
        ]);
        let classifier = BytecodeClassifier::new(source, sentinel());

        let result = classifier.classify(&[addr(1), addr(2), addr(3)]).await;

        assert_eq!(result.eoas, vec![addr(1)]);
        assert_eq!(
            result.contracts,
            vec![ClassifiedContract {
                address: addr(2),
                code_hash: keccak256(CONTRACT_CODE)
            }]
        );
        assert_eq!(result.self_destroyed, vec![addr(3)]);
        assert!(result.unclassified.is_empty());
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let source = StaticCode::new(&[(addr(2), CONTRACT_CODE)]).failing(addr(2), 2);
        let classifier = BytecodeClassifier::new(source, sentinel()).with_rounds(3);

        let result = classifier.classify(&[addr(2)]).await;

        assert_eq!(result.contracts.len(), 1);
        assert!(result.unclassified.is_empty());
        assert_eq!(classifier.source.calls_for(addr(2)), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_unclassified_not_eoa() {
        let source = StaticCode::new(&[(addr(1), EMPTY_CODE)]).failing(addr(9), usize::MAX);
        let classifier = BytecodeClassifier::new(source, sentinel()).with_rounds(2);

        let result = classifier.classify(&[addr(1), addr(9)]).await;

        assert_eq!(result.eoas, vec![addr(1)]);
        assert_eq!(result.unclassified, vec![addr(9)]);
        assert_eq!(classifier.source.calls_for(addr(9)), 2);
        assert_eq!(classifier.source.calls_for(addr(1)), 1);
    }

    #[tokio::test]
    async fn test_duplicates_probed_once() {
        let source = StaticCode::new(&[(addr(2), CONTRACT_CODE)]);
        let classifier = BytecodeClassifier::new(source, sentinel());

        let result = classifier.classify(&[addr(2), addr(2)]).await;

        assert_eq!(result.contracts.len(), 1);
        assert_eq!(classifier.source.calls_for(addr(2)), 1);
    }
}
