//! interfaces of the external collaborators: chain client, prover and
//! sender address selection

use anyhow::Result;
use cid::Cid;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{AggregateSealVerifyInfo, RegisteredAggregateProof, RegisteredSealProof, SectorNumber};
use fvm_shared::{ActorID, MethodNum};

use crate::miner::{SectorPreCommitInfo, SectorPreCommitOnChainInfo};

pub mod mock;

/// opaque handle to a chain state snapshot
pub type TipSetToken = Vec<u8>;

/// control addresses of a miner actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerInfo {
    /// owner address
    pub owner: Address,

    /// worker address
    pub worker: Address,

    /// additional addresses allowed to send miner messages
    pub control_addresses: Vec<Address>,
}

/// what a to-be-sent message is for, used by address selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePurpose {
    /// a pre-commit message
    PreCommit,

    /// a prove-commit message
    Commit,
}

/// chain operations required by the pre-commit batcher
pub trait PreCommitBatcherApi: Send + Sync {
    /// current head token & epoch
    fn chain_head(&self) -> Result<(TipSetToken, ChainEpoch)>;

    /// miner state lookup; `tok` of None reads the latest state
    fn state_miner_info(&self, maddr: &Address, tok: Option<&TipSetToken>) -> Result<MinerInfo>;

    /// push a message to the message pool, returning its cid
    fn send_msg(
        &self,
        from: &Address,
        to: &Address,
        method: MethodNum,
        value: TokenAmount,
        max_fee: TokenAmount,
        params: Vec<u8>,
    ) -> Result<Cid>;
}

/// chain operations required by the commit batcher
pub trait CommitBatcherApi: PreCommitBatcherApi {
    /// the chain's record of a sector's pre-commitment, None if absent
    fn state_sector_pre_commit_info(
        &self,
        maddr: &Address,
        sector_number: SectorNumber,
        tok: &TipSetToken,
    ) -> Result<Option<SectorPreCommitOnChainInfo>>;

    /// initial pledge the chain will demand for the sector
    fn state_miner_initial_pledge_collateral(
        &self,
        maddr: &Address,
        info: &SectorPreCommitInfo,
        tok: &TipSetToken,
    ) -> Result<TokenAmount>;
}

/// picks the sender for an outgoing message
///
/// `good_funds` is the balance that covers value plus the gas cap;
/// `min_spend` is the message value alone. the selector may settle for an
/// address that can only cover `min_spend`.
pub trait AddressSelector: Send + Sync {
    /// returns the chosen address and its available balance
    fn select_address(
        &self,
        mi: &MinerInfo,
        purpose: MessagePurpose,
        good_funds: &TokenAmount,
        min_spend: &TokenAmount,
    ) -> Result<(Address, TokenAmount)>;
}

/// everything the prover needs to fold per-sector seal proofs into one
/// aggregate
#[derive(Debug, Clone)]
pub struct AggregateSealInfo {
    /// miner actor id the sectors belong to
    pub miner: ActorID,

    /// seal proof type shared by all aggregated sectors
    pub seal_proof: RegisteredSealProof,

    /// aggregation scheme
    pub aggregate: RegisteredAggregateProof,

    /// per-sector verification infos, in proof order
    pub infos: Vec<AggregateSealVerifyInfo>,
}

/// proof aggregation backend
pub trait Prover: Send + Sync {
    /// folds `proofs` (ordered as `info.infos`) into a single aggregate proof
    fn aggregate_seal_proofs(&self, info: AggregateSealInfo, proofs: Vec<Vec<u8>>) -> Result<Vec<u8>>;
}
