//! parameter layouts, method numbers and policy of the builtin miner actor,
//! limited to what the batchers put on the wire

use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::strict_bytes;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{RegisteredSealProof, SectorNumber};

/// miner actor methods invoked by the batchers
pub mod method {
    use fvm_shared::MethodNum;

    /// Miner.ProveCommitSector
    pub const PROVE_COMMIT_SECTOR: MethodNum = 7;

    /// Miner.PreCommitSectorBatch
    pub const PRE_COMMIT_SECTOR_BATCH: MethodNum = 25;

    /// Miner.ProveCommitAggregate
    pub const PROVE_COMMIT_AGGREGATE: MethodNum = 26;
}

/// epochs in a 24h window at the 30s block delay
pub const EPOCHS_IN_DAY: ChainEpoch = 2880;

/// depth at which a tipset is considered final
pub const CHAIN_FINALITY: ChainEpoch = 900;

/// maximum age of the ticket randomness a pre-commit may reference
pub const MAX_PRE_COMMIT_RANDOMNESS_LOOKBACK: ChainEpoch = EPOCHS_IN_DAY + CHAIN_FINALITY;

/// smallest sector count the chain accepts in an aggregated prove-commit
pub const MIN_AGGREGATED_SECTORS: u64 = 4;

/// largest sector count a single aggregated proof may cover
pub const MAX_AGGREGATED_SECTORS: u64 = 819;

/// largest sector count a single PreCommitSectorBatch message may carry
pub const PRE_COMMIT_SECTOR_BATCH_MAX_SIZE: usize = 256;

/// wall-clock seconds per chain epoch
pub const BLOCK_DELAY_SECS: u64 = 30;

/// on-chain pre-commitment of a sealed sector
#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct SectorPreCommitInfo {
    /// registered seal proof type
    pub seal_proof: RegisteredSealProof,
    /// sector number being committed
    pub sector_number: SectorNumber,
    /// CommR
    pub sealed_cid: Cid,
    /// epoch the sealing ticket was drawn from
    pub seal_rand_epoch: ChainEpoch,
    /// deals packed into the sector
    pub deal_ids: Vec<DealID>,
    /// epoch at which the sector expires
    pub expiration: ChainEpoch,
    /// Deprecated:
    /// whether to replace a "committed capacity" no-deal sector
    pub replace_capacity: bool,
    /// Deprecated:
    /// deadline location of the replaced sector
    pub replace_sector_deadline: u64,
    /// Deprecated:
    /// partition location of the replaced sector
    pub replace_sector_partition: u64,
    /// Deprecated:
    /// number of the replaced sector
    pub replace_sector_number: SectorNumber,
}

/// parameters of Miner.PreCommitSectorBatch
#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct PreCommitSectorBatchParams {
    /// pre-commitments covered by the one deposit payment
    pub sectors: Vec<SectorPreCommitInfo>,
}

/// parameters of Miner.ProveCommitAggregate
#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitAggregateParams {
    /// sectors covered by the aggregate proof
    pub sector_numbers: BitField,
    /// aggregated SNARK
    #[serde(with = "strict_bytes")]
    pub aggregate_proof: Vec<u8>,
}

/// parameters of Miner.ProveCommitSector
#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitSectorParams {
    /// sector number being proven
    pub sector_number: SectorNumber,
    /// per-sector SNARK
    #[serde(with = "strict_bytes")]
    pub proof: Vec<u8>,
}

/// chain record of a pre-committed sector
#[derive(Debug, PartialEq, Eq, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct SectorPreCommitOnChainInfo {
    /// the pre-commitment as submitted
    pub info: SectorPreCommitInfo,
    /// deposit locked at pre-commit time
    pub pre_commit_deposit: TokenAmount,
    /// epoch the pre-commit message landed
    pub pre_commit_epoch: ChainEpoch,
}

#[cfg(test)]
mod tests {
    use fvm_ipld_encoding::to_vec;
    use pretty_assertions::assert_eq;

    use super::ProveCommitSectorParams;

    #[test]
    fn prove_commit_params_wire_format() {
        let params = ProveCommitSectorParams {
            sector_number: 1,
            proof: vec![0xde, 0xad],
        };

        // array(2) [ 1, bytes(2) ]
        let enc = to_vec(&params).expect("encode params");
        assert_eq!(enc, vec![0x82, 0x01, 0x42, 0xde, 0xad]);
    }
}
