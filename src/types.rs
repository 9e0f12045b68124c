//! sector types fed into the batchers by the sealing pipeline

use fvm_shared::clock::ChainEpoch;
use fvm_shared::deal::DealID;
use fvm_shared::sector::SectorNumber;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// epochs at which a deal must be active on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealSchedule {
    /// first epoch at which the deal is counted
    pub start_epoch: ChainEpoch,

    /// epoch at which the deal expires
    pub end_epoch: ChainEpoch,
}

/// on-chain deal backing a piece
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PieceDealInfo {
    /// on-chain deal id
    #[serde(rename = "DealID")]
    pub deal_id: DealID,

    /// activation window of the deal
    pub deal_schedule: DealSchedule,
}

/// one piece of a sector's payload; `deal_info` is absent for filler pieces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorPiece {
    /// deal backing this piece, if any
    pub deal_info: Option<PieceDealInfo>,
}

/// the slice of per-sector pipeline state the batchers read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorInfo {
    /// sector number under the owning miner
    pub sector_number: SectorNumber,

    /// epoch the sealing ticket was drawn from
    pub ticket_epoch: ChainEpoch,

    /// pieces packed into the sector
    pub pieces: Vec<SectorPiece>,
}

impl SectorInfo {
    /// earliest start epoch among the sector's bound deals, if it has any
    pub fn earliest_deal_start(&self) -> Option<ChainEpoch> {
        self.pieces
            .iter()
            .filter_map(|p| p.deal_info.as_ref())
            .map(|d| d.deal_schedule.start_epoch)
            .min()
    }
}

/// pipeline states of a sector, as reported by the sealing FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum SectorState {
    Empty,
    WaitDeals,
    Packing,
    GetTicket,
    PreCommit1,
    PreCommit2,
    PreCommitting,
    SubmitPreCommitBatch,
    PreCommitBatchWait,
    WaitSeed,
    Committing,
    SubmitCommit,
    SubmitCommitAggregate,
    CommitAggregateWait,
    CommitWait,
    FinalizeSector,
    Proving,

    PackingFailed,
    SealPreCommit1Failed,
    SealPreCommit2Failed,
    PreCommitFailed,
    ComputeProofFailed,
    CommitFailed,
    FinalizeFailed,

    Faulty,
    Terminating,
    TerminateWait,
    Removing,
    Removed,
}
