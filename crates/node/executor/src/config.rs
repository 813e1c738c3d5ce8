//! Execution configuration.

use keel_domain::TxCfg;

/// Execution configuration.
///
/// Carries the process-wide VM gas bound and the genesis-configured name
/// registry economics. The per-transaction `gas_limit` field is separate
/// and bounds one call from the sender's side.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionConfig {
    /// Process-wide gas bound handed to the VM for every call.
    pub call_gas_limit: u64,
    /// Minimum number of blocks a name registration must cover.
    pub min_name_registration_period: u64,
    /// Per-byte multiplier in the name cost formula.
    pub name_byte_cost_multiplier: u64,
    /// Per-block multiplier in the name cost formula.
    pub name_block_cost_multiplier: u64,
    /// Maximum registrable name length in bytes.
    pub max_name_length: usize,
    /// Maximum name payload length in bytes.
    pub max_data_length: usize,
    /// Codec bounds used when decoding raw transactions.
    pub tx: TxCfg,
}

impl ExecutionConfig {
    /// Default configuration.
    pub const DEFAULT: Self = Self {
        call_gas_limit: 1_000_000,
        min_name_registration_period: 5,
        name_byte_cost_multiplier: 1,
        name_block_cost_multiplier: 1,
        max_name_length: 64,
        max_data_length: 1 << 16,
        tx: TxCfg { max_data_bytes: 1 << 16, max_string_bytes: 1 << 16, max_entries: 64 },
    };

    /// Set the process-wide VM gas bound.
    #[must_use]
    pub const fn with_call_gas_limit(mut self, call_gas_limit: u64) -> Self {
        self.call_gas_limit = call_gas_limit;
        self
    }

    /// Set the minimum name registration period.
    #[must_use]
    pub const fn with_min_name_registration_period(mut self, blocks: u64) -> Self {
        self.min_name_registration_period = blocks;
        self
    }

    /// Set both name cost multipliers.
    #[must_use]
    pub const fn with_name_cost_multipliers(mut self, byte: u64, block: u64) -> Self {
        self.name_byte_cost_multiplier = byte;
        self.name_block_cost_multiplier = block;
        self
    }

    /// Per-block cost of holding a name with the given base cost.
    pub const fn name_cost_per_block(&self, base_cost: u64) -> u64 {
        base_cost * self.name_byte_cost_multiplier * self.name_block_cost_multiplier
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
