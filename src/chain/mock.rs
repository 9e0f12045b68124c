//! in-memory collaborators, for tests and dry runs

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use cid::multihash::Multihash;
use cid::Cid;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::SectorNumber;
use fvm_shared::MethodNum;

use super::{
    AddressSelector, AggregateSealInfo, CommitBatcherApi, MessagePurpose, MinerInfo, PreCommitBatcherApi, Prover,
    TipSetToken,
};
use crate::miner::{SectorPreCommitInfo, SectorPreCommitOnChainInfo};

const RAW_CODEC: u64 = 0x55;

/// a message recorded by [`MockChain::send_msg`]
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// chosen sender
    pub from: Address,

    /// destination actor
    pub to: Address,

    /// invoked method number
    pub method: MethodNum,

    /// attached value
    pub value: TokenAmount,

    /// gas cap the message was sent under
    pub max_fee: TokenAmount,

    /// cbor-encoded params
    pub params: Vec<u8>,

    /// cid assigned to the message
    pub cid: Cid,
}

/// canned chain state with message recording
pub struct MockChain {
    /// epoch returned by `chain_head`
    pub head_epoch: Mutex<ChainEpoch>,

    /// per-sector pre-commit records served by `state_sector_pre_commit_info`
    pub precommits: Mutex<HashMap<SectorNumber, SectorPreCommitOnChainInfo>>,

    /// pledge returned by `state_miner_initial_pledge_collateral`
    pub initial_pledge: Mutex<TokenAmount>,

    /// every message pushed so far
    pub messages: Mutex<Vec<SentMessage>>,

    /// when set, `send_msg` fails with this text
    pub fail_send: Mutex<Option<String>>,
}

impl MockChain {
    /// chain at the given head epoch
    pub fn new(head_epoch: ChainEpoch) -> Self {
        MockChain {
            head_epoch: Mutex::new(head_epoch),
            precommits: Mutex::new(HashMap::new()),
            initial_pledge: Mutex::new(TokenAmount::from_atto(0)),
            messages: Mutex::new(Vec::new()),
            fail_send: Mutex::new(None),
        }
    }

    /// registers the chain-side pre-commit record for a sector
    pub fn record_precommit(&self, sector_number: SectorNumber, info: SectorPreCommitInfo, deposit: TokenAmount) {
        self.precommits.lock().expect("lock poisoned").insert(
            sector_number,
            SectorPreCommitOnChainInfo {
                info,
                pre_commit_deposit: deposit,
                pre_commit_epoch: *self.head_epoch.lock().expect("lock poisoned"),
            },
        );
    }

    /// snapshot of the recorded messages
    pub fn sent(&self) -> Vec<SentMessage> {
        self.messages.lock().expect("lock poisoned").clone()
    }
}

fn cid_of(seq: u64) -> Cid {
    let digest = seq.to_be_bytes();
    let mh = Multihash::wrap(0x0, &digest).expect("digest fits");
    Cid::new_v1(RAW_CODEC, mh)
}

impl PreCommitBatcherApi for MockChain {
    fn chain_head(&self) -> Result<(TipSetToken, ChainEpoch)> {
        Ok((Vec::new(), *self.head_epoch.lock().expect("lock poisoned")))
    }

    fn state_miner_info(&self, _maddr: &Address, _tok: Option<&TipSetToken>) -> Result<MinerInfo> {
        Ok(MinerInfo {
            owner: Address::new_id(100),
            worker: Address::new_id(101),
            control_addresses: vec![Address::new_id(102)],
        })
    }

    fn send_msg(
        &self,
        from: &Address,
        to: &Address,
        method: MethodNum,
        value: TokenAmount,
        max_fee: TokenAmount,
        params: Vec<u8>,
    ) -> Result<Cid> {
        if let Some(text) = self.fail_send.lock().expect("lock poisoned").as_ref() {
            return Err(anyhow!("{}", text));
        }

        let mut messages = self.messages.lock().expect("lock poisoned");
        let cid = cid_of(messages.len() as u64);
        messages.push(SentMessage {
            from: *from,
            to: *to,
            method,
            value,
            max_fee,
            params,
            cid,
        });

        Ok(cid)
    }
}

impl CommitBatcherApi for MockChain {
    fn state_sector_pre_commit_info(
        &self,
        _maddr: &Address,
        sector_number: SectorNumber,
        _tok: &TipSetToken,
    ) -> Result<Option<SectorPreCommitOnChainInfo>> {
        Ok(self
            .precommits
            .lock()
            .expect("lock poisoned")
            .get(&sector_number)
            .cloned())
    }

    fn state_miner_initial_pledge_collateral(
        &self,
        _maddr: &Address,
        _info: &SectorPreCommitInfo,
        _tok: &TipSetToken,
    ) -> Result<TokenAmount> {
        Ok(self.initial_pledge.lock().expect("lock poisoned").clone())
    }
}

/// always picks the worker address, reporting `good_funds` as its balance
pub struct WorkerAddressSelector;

impl AddressSelector for WorkerAddressSelector {
    fn select_address(
        &self,
        mi: &MinerInfo,
        _purpose: MessagePurpose,
        good_funds: &TokenAmount,
        _min_spend: &TokenAmount,
    ) -> Result<(Address, TokenAmount)> {
        Ok((mi.worker, good_funds.clone()))
    }
}

/// records aggregation requests and returns a digest-sized fake proof
#[derive(Default)]
pub struct MockProver {
    /// every aggregation request observed, in call order
    pub requests: Mutex<Vec<AggregateSealInfo>>,
}

impl Prover for MockProver {
    fn aggregate_seal_proofs(&self, info: AggregateSealInfo, proofs: Vec<Vec<u8>>) -> Result<Vec<u8>> {
        let folded = proofs.into_iter().flatten().collect();
        self.requests.lock().expect("lock poisoned").push(info);
        Ok(folded)
    }
}
