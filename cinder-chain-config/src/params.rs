use crate::Hardfork;

/// Protocol parameters consumed by the execution layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainParams {
    /// Intrinsic gas charged per transaction.
    pub tx_gas: u64,
    pub max_code_size: usize,
}

pub fn for_hardfork(fork: Hardfork) -> &'static ChainParams {
    match fork {
        Hardfork::Frontier | Hardfork::Homestead => &CHAIN_PARAMS_LEGACY,
        Hardfork::Byzantium
        | Hardfork::Constantinople
        | Hardfork::Petersburg
        | Hardfork::Istanbul
        | Hardfork::Berlin
        | Hardfork::London
        | Hardfork::Paris
        | Hardfork::Shanghai
        | Hardfork::Cancun => &CHAIN_PARAMS_MODERN,
        Hardfork::Prague => &CHAIN_PARAMS_PRAGUE,
    }
}

const CHAIN_PARAMS_LEGACY: ChainParams = ChainParams {
    tx_gas: 21_000,
    max_code_size: 24 * 1024,
};

const CHAIN_PARAMS_MODERN: ChainParams = ChainParams {
    tx_gas: 21_000,
    max_code_size: 24 * 1024,
};

const CHAIN_PARAMS_PRAGUE: ChainParams = ChainParams {
    tx_gas: 21_000,
    max_code_size: 128 * 1024,
};
