use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

/// Read-through cache of block timestamps keyed by (network, block number).
/// Lives for the whole process; block timestamps never change.
#[derive(Debug, Default)]
pub struct BlockTimestampCache {
    entries: Mutex<HashMap<(String, u64), u64>>,
}

impl BlockTimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, network: &str, block_number: u64) -> Option<u64> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&(network.to_string(), block_number)).copied()
    }

    pub fn insert(&self, network: &str, block_number: u64, timestamp: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((network.to_string(), block_number), timestamp);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached timestamp, or runs `fetch` and remembers its result.
    /// Failed fetches are not cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        network: &str,
        block_number: u64,
        fetch: F,
    ) -> Result<u64, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, E>>,
    {
        if let Some(timestamp) = self.get(network, block_number) {
            return Ok(timestamp);
        }

        let timestamp = fetch().await?;
        self.insert(network, block_number, timestamp);
        Ok(timestamp)
    }
}
