//! Chain tip view consumed by the executor.

use alloy_primitives::B256;

/// Read-only view of the latest committed block, supplying the VM's
/// environmental parameters.
pub trait Tip: Send + Sync {
    /// Height of the latest committed block.
    fn last_block_height(&self) -> u64;

    /// Hash of the latest committed block.
    fn last_block_hash(&self) -> B256;

    /// Timestamp of the latest committed block, in seconds.
    fn last_block_time(&self) -> u64;
}

/// Fixed tip snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct TipInfo {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: B256,
    /// Block timestamp in seconds.
    pub time: u64,
}

impl TipInfo {
    /// Tip snapshot from explicit fields.
    pub const fn new(height: u64, hash: B256, time: u64) -> Self {
        Self { height, hash, time }
    }
}

impl Tip for TipInfo {
    fn last_block_height(&self) -> u64 {
        self.height
    }

    fn last_block_hash(&self) -> B256 {
        self.hash
    }

    fn last_block_time(&self) -> u64 {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_info_reports_fields() {
        let tip = TipInfo::new(42, B256::repeat_byte(0xab), 1234567890);
        assert_eq!(tip.last_block_height(), 42);
        assert_eq!(tip.last_block_hash(), B256::repeat_byte(0xab));
        assert_eq!(tip.last_block_time(), 1234567890);
    }
}
