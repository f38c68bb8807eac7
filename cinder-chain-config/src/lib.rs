pub mod params;

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

pub use crate::params::ChainParams;

/// Named protocol rulesets, in activation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Hardfork {
    Frontier,
    Homestead,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    Berlin,
    London,
    Paris,
    Shanghai,
    Cancun,
    Prague,
}

impl Hardfork {
    pub const LATEST: Self = Self::Prague;

    pub fn name(&self) -> &'static str {
        match self {
            Self::Frontier => "frontier",
            Self::Homestead => "homestead",
            Self::Byzantium => "byzantium",
            Self::Constantinople => "constantinople",
            Self::Petersburg => "petersburg",
            Self::Istanbul => "istanbul",
            Self::Berlin => "berlin",
            Self::London => "london",
            Self::Paris => "paris",
            Self::Shanghai => "shanghai",
            Self::Cancun => "cancun",
            Self::Prague => "prague",
        }
    }

    pub fn params(&self) -> &'static ChainParams {
        params::for_hardfork(*self)
    }
}

impl std::fmt::Display for Hardfork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What activates a hardfork.
///
/// Pre-merge forks activate by block number, the merge itself by total
/// difficulty, and everything after by timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkCondition {
    Block(u64),
    Timestamp(u64),
    TotalDifficulty(U256),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusType {
    ProofOfWork,
    ProofOfAuthority,
    ProofOfStake,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub balance: U256,
    #[serde(default)]
    pub nonce: u64,
}

/// Genesis block parameters and initial allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisSpec {
    pub timestamp: u64,
    pub difficulty: U256,
    pub gas_limit: u64,
    #[serde(default)]
    pub extra_data: Bytes,
    #[serde(default)]
    pub base_fee_per_gas: Option<u64>,
    #[serde(default)]
    pub alloc: BTreeMap<Address, GenesisAccount>,
}

impl Default for GenesisSpec {
    fn default() -> Self {
        Self {
            timestamp: 0,
            difficulty: U256::from(1u64),
            gas_limit: 30_000_000,
            extra_data: Bytes::new(),
            base_fee_per_gas: Some(7),
            alloc: BTreeMap::new(),
        }
    }
}

/// Static description of a chain: consensus engine, genesis, and the
/// hardfork activation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub name: String,
    pub consensus: ConsensusType,
    pub genesis: GenesisSpec,
    /// Must be sorted in activation order.
    pub schedule: Vec<(Hardfork, ForkCondition)>,
}

impl ChainSpec {
    /// The ruleset active for a block, derived from its number, the total
    /// difficulty of its ancestry, and its timestamp.
    ///
    /// Total difficulty is optional; without it the merge transition is
    /// never considered active, which mirrors contexts (like header-only
    /// lookups) where the difficulty chain is unknown.
    pub fn hardfork_for(&self, number: u64, td: Option<U256>, timestamp: u64) -> Hardfork {
        let mut active = Hardfork::Frontier;
        for (fork, condition) in &self.schedule {
            let hit = match condition {
                ForkCondition::Block(block) => number >= *block,
                ForkCondition::Timestamp(ts) => timestamp >= *ts,
                ForkCondition::TotalDifficulty(ttd) => td.is_some_and(|td| td >= *ttd),
            };
            if hit {
                active = *fork;
            }
        }
        active
    }

    /// Whether `fork` is scheduled at all on this chain.
    pub fn has_hardfork(&self, fork: Hardfork) -> bool {
        self.schedule.iter().any(|(f, _)| *f == fork)
    }

    pub fn is_proof_of_authority(&self) -> bool {
        self.consensus == ConsensusType::ProofOfAuthority
    }

    /// Ethereum mainnet schedule, abridged to the forks this crate models.
    pub fn mainnet() -> Self {
        use ForkCondition::*;
        Self {
            name: "mainnet".into(),
            consensus: ConsensusType::ProofOfWork,
            genesis: GenesisSpec {
                timestamp: 0,
                difficulty: U256::from(17_179_869_184u64),
                gas_limit: 5_000,
                extra_data: Bytes::new(),
                base_fee_per_gas: None,
                alloc: BTreeMap::new(),
            },
            schedule: vec![
                (Hardfork::Frontier, Block(0)),
                (Hardfork::Homestead, Block(1_150_000)),
                (Hardfork::Byzantium, Block(4_370_000)),
                (Hardfork::Constantinople, Block(7_280_000)),
                (Hardfork::Petersburg, Block(7_280_000)),
                (Hardfork::Istanbul, Block(9_069_000)),
                (Hardfork::Berlin, Block(12_244_000)),
                (Hardfork::London, Block(12_965_000)),
                (
                    Hardfork::Paris,
                    TotalDifficulty(U256::from(58_750_000_000_000_000_000_000u128)),
                ),
                (Hardfork::Shanghai, Timestamp(1_681_338_455)),
                (Hardfork::Cancun, Timestamp(1_710_338_135)),
            ],
        }
    }

    /// A single-fork development chain, useful for tests and local nets.
    pub fn dev(consensus: ConsensusType, fork: Hardfork) -> Self {
        Self {
            name: "dev".into(),
            consensus,
            genesis: GenesisSpec::default(),
            schedule: vec![(fork, ForkCondition::Block(0))],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_block_number_forks() {
        let spec = ChainSpec::mainnet();
        assert_eq!(spec.hardfork_for(0, None, 0), Hardfork::Frontier);
        assert_eq!(spec.hardfork_for(1_150_000, None, 0), Hardfork::Homestead);
        assert_eq!(spec.hardfork_for(12_964_999, None, 0), Hardfork::Berlin);
        assert_eq!(spec.hardfork_for(12_965_000, None, 0), Hardfork::London);
    }

    #[test]
    fn merge_activates_on_total_difficulty() {
        let spec = ChainSpec::mainnet();
        let ttd = U256::from(58_750_000_000_000_000_000_000u128);
        assert_eq!(
            spec.hardfork_for(15_537_394, Some(ttd - U256::from(1u64)), 0),
            Hardfork::London
        );
        assert_eq!(spec.hardfork_for(15_537_394, Some(ttd), 0), Hardfork::Paris);
        // without a td the merge is not considered
        assert_eq!(spec.hardfork_for(15_537_394, None, 0), Hardfork::London);
    }

    #[test]
    fn timestamp_forks_after_merge() {
        let spec = ChainSpec::mainnet();
        let ttd = U256::from(58_750_000_000_000_000_000_000u128);
        assert_eq!(
            spec.hardfork_for(17_000_000, Some(ttd), 1_681_338_455),
            Hardfork::Shanghai
        );
        assert_eq!(
            spec.hardfork_for(19_000_000, Some(ttd), 1_710_338_135),
            Hardfork::Cancun
        );
    }

    #[test]
    fn hardfork_ordering() {
        assert!(Hardfork::Paris > Hardfork::London);
        assert!(Hardfork::Shanghai >= Hardfork::Paris);
        assert!(Hardfork::Berlin < Hardfork::Paris);
    }

    #[test]
    fn dev_spec_single_fork() {
        let spec = ChainSpec::dev(ConsensusType::ProofOfStake, Hardfork::Shanghai);
        assert_eq!(spec.hardfork_for(0, None, 0), Hardfork::Shanghai);
        assert_eq!(spec.hardfork_for(100, Some(U256::ZERO), 12345), Hardfork::Shanghai);
    }

    #[test]
    fn params_change_across_revisions() {
        assert!(Hardfork::Prague.params().max_code_size > Hardfork::Frontier.params().max_code_size);
        assert_eq!(Hardfork::London.params().tx_gas, 21_000);
    }
}
