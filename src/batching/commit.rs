//! batching & aggregation of prove-commit messages

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Context, Result};
use cid::Cid;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::to_vec;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{
    AggregateSealVerifyInfo, RegisteredAggregateProof, RegisteredSealProof, SectorID, SectorNumber,
};

use super::{sector_deadline, CommitBatchRes, Done, PendingBatch};
use crate::chain::{AddressSelector, AggregateSealInfo, CommitBatcherApi, MessagePurpose, MinerInfo, Prover, TipSetToken};
use crate::config::{FeeConfig, GetSealingConfig, SealingConfig};
use crate::logging::{error, info, warn};
use crate::miner::{method, ProveCommitAggregateParams, ProveCommitSectorParams, MIN_AGGREGATED_SECTORS};
use crate::types::SectorInfo;

/// one sector's proof waiting for aggregation
#[derive(Debug, Clone)]
pub struct AggregateInput {
    /// seal proof type the sector was sealed with
    pub spt: RegisteredSealProof,

    /// verification info, the unit ordered for aggregation
    pub info: AggregateSealVerifyInfo,

    /// the per-sector SNARK
    pub proof: Vec<u8>,
}

type Pending = Arc<Mutex<PendingBatch<AggregateInput, CommitBatchRes>>>;

/// accumulates per-sector proofs and submits them either as one
/// ProveCommitAggregate message or, under the chain's aggregation floor,
/// as per-sector ProveCommitSector messages
pub struct CommitBatcher {
    maddr: Address,
    api: Arc<dyn CommitBatcherApi>,
    pending: Pending,

    notify_tx: Sender<()>,
    force_tx: Sender<Sender<Vec<CommitBatchRes>>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stopped_rx: Receiver<()>,
}

impl CommitBatcher {
    /// starts the dispatcher and returns the control handle
    pub fn new(
        maddr: Address,
        api: Arc<dyn CommitBatcherApi>,
        addr_sel: Arc<dyn AddressSelector>,
        fee_cfg: FeeConfig,
        get_cfg: GetSealingConfig,
        prover: Arc<dyn Prover>,
    ) -> Self {
        let pending: Pending = Arc::new(Mutex::new(PendingBatch::new()));

        let (notify_tx, notify_rx) = bounded(1);
        let (force_tx, force_rx) = bounded(0);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (stopped_tx, stopped_rx) = bounded::<()>(0);

        let dispatcher = Dispatcher {
            maddr,
            api: api.clone(),
            addr_sel,
            fee_cfg,
            get_cfg,
            prover,
            pending: pending.clone(),
            notify_rx,
            force_rx,
            stop_rx,
            _stopped_tx: stopped_tx,
        };

        thread::spawn(move || dispatcher.run());

        CommitBatcher {
            maddr,
            api,
            pending,
            notify_tx,
            force_tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stopped_rx,
        }
    }

    /// registers the sector's proof and blocks until the batch containing
    /// it is dispatched, or `done` is cancelled
    ///
    /// cancellation unblocks this caller only; the entry stays enqueued
    /// and the batch may still reach the chain
    pub fn add_commit(&self, done: &Done, sector: &SectorInfo, input: AggregateInput) -> Result<CommitBatchRes> {
        let (_, cur_epoch) = self.api.chain_head().context("getting chain head")?;

        let sn = sector.sector_number;
        let sent_rx = {
            let mut pending = self.pending.lock().expect("lock poisoned");
            let sent_rx = pending.add(sn, input, sector_deadline(cur_epoch, sector));

            match self.notify_tx.try_send(()) {
                // a pending notification is enough for any number of admissions
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    pending.withdraw(sn);
                    return Err(anyhow!("commit batcher stopped"));
                }
            }

            sent_rx
        };

        select! {
            recv(sent_rx) -> res => res.context("commit batch result channel broke"),
            recv(done) -> _ => Err(anyhow!("cancelled while waiting for the commit batch")),
        }
    }

    /// forces a firing regardless of the size window; returns the results
    /// of the forced batch, empty if nothing was pending
    pub fn flush(&self, done: &Done) -> Result<Vec<CommitBatchRes>> {
        let (res_tx, res_rx) = bounded(1);

        select! {
            send(self.force_tx, res_tx) -> sent => {
                sent.map_err(|_| anyhow!("commit batcher stopped"))?;

                select! {
                    recv(res_rx) -> res => res.context("flush result channel broke"),
                    recv(done) -> _ => Err(anyhow!("cancelled while waiting for the flush result")),
                }
            }

            recv(done) -> _ => Err(anyhow!("cancelled while requesting a flush")),
        }
    }

    /// sectors currently waiting for a batch, ascending
    pub fn pending(&self) -> Vec<SectorID> {
        let miner = self.maddr.id().unwrap_or_default();
        self.pending.lock().expect("lock poisoned").sorted_ids(miner)
    }

    /// shuts the dispatcher down and waits for it to exit; idempotent
    pub fn stop(&self, done: &Done) -> Result<()> {
        drop(self.stop_tx.lock().expect("lock poisoned").take());

        select! {
            recv(self.stopped_rx) -> _ => Ok(()),
            recv(done) -> _ => Err(anyhow!("cancelled while waiting for the batcher to stop")),
        }
    }
}

struct Dispatcher {
    maddr: Address,
    api: Arc<dyn CommitBatcherApi>,
    addr_sel: Arc<dyn AddressSelector>,
    fee_cfg: FeeConfig,
    get_cfg: GetSealingConfig,
    prover: Arc<dyn Prover>,
    pending: Pending,

    notify_rx: Receiver<()>,
    force_rx: Receiver<Sender<Vec<CommitBatchRes>>>,
    stop_rx: Receiver<()>,
    _stopped_tx: Sender<()>,
}

impl Dispatcher {
    fn run(self) {
        let cfg = match (self.get_cfg)() {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("getting sealing config: {:?}", e);
                return;
            }
        };

        let mut force_res: Option<Sender<Vec<CommitBatchRes>>> = None;
        let mut last_res = Vec::new();

        loop {
            if let Some(sink) = force_res.take() {
                let _ = sink.send(std::mem::take(&mut last_res));
            }
            last_res = Vec::new();

            let timer = self
                .pending
                .lock()
                .expect("lock poisoned")
                .next_timer(cfg.commit_batch_wait, cfg.commit_batch_slack);

            let mut send_above_max = false;
            let mut send_above_min = false;

            select! {
                recv(self.stop_rx) -> _ => return,

                recv(self.notify_rx) -> n => {
                    if n.is_err() {
                        return;
                    }
                    send_above_max = true;
                }

                recv(timer) -> _ => send_above_min = true,

                recv(self.force_rx) -> fr => match fr {
                    Ok(sink) => force_res = Some(sink),
                    Err(_) => return,
                },
            }

            match self.maybe_start_batch(send_above_max, send_above_min) {
                Ok(res) => last_res = res,
                Err(e) => warn!("commit batch processing: {:?}", e),
            }
        }
    }

    fn maybe_start_batch(&self, notif: bool, after: bool) -> Result<Vec<CommitBatchRes>> {
        let (total, entries) = {
            let pending = self.pending.lock().expect("lock poisoned");
            if pending.is_empty() {
                return Ok(Vec::new());
            }

            (pending.len(), pending.snapshot())
        };

        let cfg = (self.get_cfg)().context("getting sealing config")?;

        if notif && total < cfg.max_commit_batch {
            return Ok(Vec::new());
        }

        if after && total < cfg.min_commit_batch {
            return Ok(Vec::new());
        }

        let (mut res, err) = if total < cfg.min_commit_batch || total < MIN_AGGREGATED_SECTORS as usize {
            self.process_individually(entries)
        } else {
            self.process_batch(&cfg, entries)
        };

        if res.is_empty() {
            return match err {
                Some(e) => Err(e),
                None => Ok(res),
            };
        }

        let mut pending = self.pending.lock().expect("lock poisoned");
        for r in res.iter_mut() {
            if let Some(e) = &err {
                r.error = Some(format!("{:#}", e));
            }

            // collateral-failed sectors get the same record and are cleared
            // along with the rest of the batch
            let sectors: Vec<SectorNumber> = r
                .sectors
                .iter()
                .copied()
                .chain(r.failed_sectors.keys().copied())
                .collect();
            pending.deliver(&sectors, r);
        }

        Ok(res)
    }

    fn process_batch(
        &self,
        cfg: &SealingConfig,
        entries: Vec<(SectorNumber, AggregateInput)>,
    ) -> (Vec<CommitBatchRes>, Option<anyhow::Error>) {
        let tok = match self.api.chain_head() {
            Ok((tok, _)) => tok,
            Err(e) => return (Vec::new(), Some(e.context("getting chain head"))),
        };

        let total = entries.len();
        let by_sn: HashMap<SectorNumber, AggregateInput> = entries.into_iter().collect();

        let mut res = CommitBatchRes::default();
        let mut sector_numbers = BitField::new();
        let mut infos = Vec::with_capacity(total);
        let mut collateral = TokenAmount::from_atto(0);

        for (sn, input) in by_sn.iter() {
            if infos.len() >= cfg.max_commit_batch {
                info!("commit batch full");
                break;
            }

            let sc = match self.sector_collateral(*sn, &tok) {
                Ok(sc) => sc,
                Err(e) => {
                    res.failed_sectors.insert(*sn, format!("{:#}", e));
                    continue;
                }
            };

            collateral = &collateral + &sc;

            res.sectors.push(*sn);
            sector_numbers.set(*sn);
            infos.push(input.info.clone());
        }

        if infos.is_empty() {
            // nothing aggregatable; the failure map alone goes back to the
            // waiters
            return (vec![res], None);
        }

        infos.sort_by_key(|i| i.sector_number);

        match self.aggregate_and_send(&by_sn, sector_numbers, infos, &collateral) {
            Ok(mcid) => {
                res.msg = Some(mcid);
                info!("sent ProveCommitAggregate message cid={} todo={} sectors={}", mcid, total, res.sectors.len());
                (vec![res], None)
            }
            Err(e) => (vec![res], Some(e)),
        }
    }

    fn aggregate_and_send(
        &self,
        by_sn: &HashMap<SectorNumber, AggregateInput>,
        sector_numbers: BitField,
        infos: Vec<AggregateSealVerifyInfo>,
        collateral: &TokenAmount,
    ) -> Result<Cid> {
        let mut proofs = Vec::with_capacity(infos.len());
        for info in &infos {
            let entry = by_sn
                .get(&info.sector_number)
                .ok_or_else(|| anyhow!("entry for sector {} vanished", info.sector_number))?;
            proofs.push(entry.proof.clone());
        }

        let mid = self.maddr.id().context("getting miner id")?;
        let seal_proof = by_sn[&infos[0].sector_number].spt;

        let aggregate_proof = self
            .prover
            .aggregate_seal_proofs(
                AggregateSealInfo {
                    miner: mid,
                    seal_proof,
                    aggregate: RegisteredAggregateProof::SnarkPackV1,
                    infos,
                },
                proofs,
            )
            .context("aggregating proofs")?;

        let params = ProveCommitAggregateParams {
            sector_numbers,
            aggregate_proof,
        };
        let enc = to_vec(&params).context("couldn't serialize ProveCommitAggregateParams")?;

        let mi = self
            .api
            .state_miner_info(&self.maddr, None)
            .context("couldn't get miner info")?;

        let good_funds = collateral + &self.fee_cfg.max_commit_gas_fee;
        let (from, _) = self
            .addr_sel
            .select_address(&mi, MessagePurpose::Commit, &good_funds, collateral)
            .context("no good address found")?;

        self.api
            .send_msg(
                &from,
                &self.maddr,
                method::PROVE_COMMIT_AGGREGATE,
                collateral.clone(),
                self.fee_cfg.max_commit_gas_fee.clone(),
                enc,
            )
            .context("sending message failed")
    }

    fn process_individually(
        &self,
        entries: Vec<(SectorNumber, AggregateInput)>,
    ) -> (Vec<CommitBatchRes>, Option<anyhow::Error>) {
        let mi = match self.api.state_miner_info(&self.maddr, None) {
            Ok(mi) => mi,
            Err(e) => return (Vec::new(), Some(e.context("couldn't get miner info"))),
        };

        let tok = match self.api.chain_head() {
            Ok((tok, _)) => tok,
            Err(e) => return (Vec::new(), Some(e.context("getting chain head"))),
        };

        let mut res = Vec::with_capacity(entries.len());

        for (sn, input) in entries {
            let mut r = CommitBatchRes {
                sectors: vec![sn],
                ..Default::default()
            };

            match self.process_single(&mi, sn, &input, &tok) {
                Ok(mcid) => r.msg = Some(mcid),
                Err(e) => {
                    error!("process single: {:?}", e);
                    r.failed_sectors.insert(sn, format!("{:#}", e));
                }
            }

            res.push(r);
        }

        (res, None)
    }

    fn process_single(&self, mi: &MinerInfo, sn: SectorNumber, input: &AggregateInput, tok: &TipSetToken) -> Result<Cid> {
        let params = ProveCommitSectorParams {
            sector_number: sn,
            proof: input.proof.clone(),
        };
        let enc = to_vec(&params).context("marshaling commit params")?;

        let collateral = self.sector_collateral(sn, tok)?;
        let good_funds = &collateral + &self.fee_cfg.max_commit_gas_fee;

        let (from, _) = self
            .addr_sel
            .select_address(mi, MessagePurpose::Commit, &good_funds, &collateral)
            .context("no good address to send commit message from")?;

        self.api
            .send_msg(
                &from,
                &self.maddr,
                method::PROVE_COMMIT_SECTOR,
                collateral,
                self.fee_cfg.max_commit_gas_fee.clone(),
                enc,
            )
            .context("pushing message to mpool")
    }

    /// initial pledge net of the deposit already posted at pre-commit time,
    /// floored at zero
    fn sector_collateral(&self, sn: SectorNumber, tok: &TipSetToken) -> Result<TokenAmount> {
        let pci = self
            .api
            .state_sector_pre_commit_info(&self.maddr, sn, tok)
            .context("getting precommit info")?
            .ok_or_else(|| anyhow!("precommit info not found on chain"))?;

        let pledge = self
            .api
            .state_miner_initial_pledge_collateral(&self.maddr, &pci.info, tok)
            .context("getting initial pledge collateral")?;

        let collateral = &pledge - &pci.pre_commit_deposit;
        if collateral < TokenAmount::from_atto(0) {
            return Ok(TokenAmount::from_atto(0));
        }

        Ok(collateral)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use cid::Cid;
    use fvm_ipld_encoding::from_slice;
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use fvm_shared::randomness::Randomness;
    use fvm_shared::sector::{AggregateSealVerifyInfo, RegisteredSealProof};
    use pretty_assertions::assert_eq;
    use rand::seq::SliceRandom;

    use super::{AggregateInput, CommitBatcher};
    use crate::batching::dones;
    use crate::chain::mock::{MockChain, MockProver, WorkerAddressSelector};
    use crate::config::{static_config, FeeConfig, SealingConfig};
    use crate::miner::{method, ProveCommitAggregateParams, SectorPreCommitInfo};
    use crate::types::SectorInfo;

    const HEAD_EPOCH: i64 = 10_000;

    fn sector(number: u64) -> SectorInfo {
        SectorInfo {
            sector_number: number,
            ticket_epoch: HEAD_EPOCH,
            pieces: Vec::new(),
        }
    }

    fn input(number: u64) -> AggregateInput {
        AggregateInput {
            spt: RegisteredSealProof::StackedDRG32GiBV1P1,
            info: AggregateSealVerifyInfo {
                sector_number: number,
                randomness: Randomness(vec![0; 32]),
                interactive_randomness: Randomness(vec![1; 32]),
                sealed_cid: Cid::default(),
                unsealed_cid: Cid::default(),
            },
            proof: number.to_be_bytes().to_vec(),
        }
    }

    fn setup(cfg: SealingConfig) -> (Arc<MockChain>, Arc<MockProver>, Arc<CommitBatcher>) {
        let chain = Arc::new(MockChain::new(HEAD_EPOCH));
        let prover = Arc::new(MockProver::default());
        let batcher = Arc::new(CommitBatcher::new(
            Address::new_id(1000),
            chain.clone(),
            Arc::new(WorkerAddressSelector),
            FeeConfig::default(),
            static_config(cfg),
            prover.clone(),
        ));

        (chain, prover, batcher)
    }

    fn record_precommit(chain: &MockChain, number: u64, deposit: i64) {
        chain.record_precommit(
            number,
            SectorPreCommitInfo {
                sector_number: number,
                ..Default::default()
            },
            TokenAmount::from_atto(deposit),
        );
    }

    fn spawn_add(b: &Arc<CommitBatcher>, number: u64) -> thread::JoinHandle<anyhow::Result<super::CommitBatchRes>> {
        let b = b.clone();
        thread::spawn(move || {
            let (_done_tx, done) = dones();
            b.add_commit(&done, &sector(number), input(number))
        })
    }

    #[test]
    fn below_floor_commits_individually() {
        let (chain, prover, b) = setup(SealingConfig {
            min_commit_batch: 4,
            ..Default::default()
        });
        *chain.initial_pledge.lock().expect("lock poisoned") = TokenAmount::from_atto(100);
        for sn in 1..=3 {
            record_precommit(&chain, sn, 40);
        }

        let handles: Vec<_> = (1..=3).map(|sn| spawn_add(&b, sn)).collect();
        thread::sleep(Duration::from_millis(200));

        let (_done_tx, done) = dones();
        let res = b.flush(&done).expect("flush");
        assert_eq!(res.len(), 3, "one result row per sector");

        for h in handles {
            let r = h.join().expect("join add").expect("add result");
            assert_eq!(r.sectors.len(), 1);
            assert!(r.msg.is_some());
            assert!(r.failed_sectors.is_empty());
        }

        let sent = chain.sent();
        assert_eq!(sent.len(), 3);
        for msg in &sent {
            assert_eq!(msg.method, method::PROVE_COMMIT_SECTOR);
            // pledge 100 - deposit 40
            assert_eq!(msg.value, TokenAmount::from_atto(60));
        }

        assert!(prover.requests.lock().expect("lock poisoned").is_empty(), "no aggregation below the floor");
        assert!(b.pending().is_empty());
    }

    #[test]
    fn aggregates_above_floor_in_sector_order() {
        let (chain, prover, b) = setup(SealingConfig {
            min_commit_batch: 4,
            ..Default::default()
        });
        *chain.initial_pledge.lock().expect("lock poisoned") = TokenAmount::from_atto(100);

        let mut numbers: Vec<u64> = (1..=10).collect();
        numbers.shuffle(&mut rand::thread_rng());
        for sn in &numbers {
            record_precommit(&chain, *sn, 40);
        }

        let handles: Vec<_> = numbers.iter().map(|sn| spawn_add(&b, *sn)).collect();
        thread::sleep(Duration::from_millis(200));

        let (_done_tx, done) = dones();
        let res = b.flush(&done).expect("flush");
        assert_eq!(res.len(), 1);
        let mcid = res[0].msg.expect("message cid");

        for h in handles {
            let r = h.join().expect("join add").expect("add result");
            assert_eq!(r.msg, Some(mcid), "every waiter sees the same message");
        }

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, method::PROVE_COMMIT_AGGREGATE);
        assert_eq!(sent[0].value, TokenAmount::from_atto(60 * 10));

        let params: ProveCommitAggregateParams = from_slice(&sent[0].params).expect("decode params");
        let in_field: Vec<u64> = params.sector_numbers.iter().collect();
        assert_eq!(in_field, (1..=10).collect::<Vec<_>>());

        // the aggregated snark is order-sensitive: infos must be presented
        // sorted by sector number no matter the admission order
        let requests = prover.requests.lock().expect("lock poisoned");
        assert_eq!(requests.len(), 1);
        let order: Vec<u64> = requests[0].infos.iter().map(|i| i.sector_number).collect();
        assert_eq!(order, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn collateral_failure_drops_only_that_sector() {
        let (chain, _prover, b) = setup(SealingConfig {
            min_commit_batch: 4,
            ..Default::default()
        });
        *chain.initial_pledge.lock().expect("lock poisoned") = TokenAmount::from_atto(100);
        for sn in 1..=8 {
            if sn != 5 {
                record_precommit(&chain, sn, 40);
            }
        }

        let handles: Vec<_> = (1..=8).map(|sn| spawn_add(&b, sn)).collect();
        thread::sleep(Duration::from_millis(200));

        let (_done_tx, done) = dones();
        let res = b.flush(&done).expect("flush");
        assert_eq!(res.len(), 1);
        assert!(res[0].msg.is_some(), "the batch proceeds without the failed sector");

        let mut sectors = res[0].sectors.clone();
        sectors.sort_unstable();
        assert_eq!(sectors, vec![1, 2, 3, 4, 6, 7, 8]);

        let reason = res[0].failed_sectors.get(&5).expect("sector 5 marked failed");
        assert!(reason.contains("not found"), "got {}", reason);

        // the failed sector's waiter receives the same record and is cleared
        for h in handles {
            let r = h.join().expect("join add").expect("add result");
            assert_eq!(r.msg, res[0].msg);
        }
        assert!(b.pending().is_empty());

        let params: ProveCommitAggregateParams =
            from_slice(&chain.sent()[0].params).expect("decode params");
        let in_field: Vec<u64> = params.sector_numbers.iter().collect();
        assert_eq!(in_field, vec![1, 2, 3, 4, 6, 7, 8]);
    }

    #[test]
    fn collateral_is_floored_at_zero() {
        let (chain, _prover, b) = setup(SealingConfig {
            min_commit_batch: 4,
            ..Default::default()
        });
        *chain.initial_pledge.lock().expect("lock poisoned") = TokenAmount::from_atto(100);

        // one sector already over-deposited, three below
        record_precommit(&chain, 1, 150);
        for sn in 2..=4 {
            record_precommit(&chain, sn, 40);
        }

        let handles: Vec<_> = (1..=4).map(|sn| spawn_add(&b, sn)).collect();
        thread::sleep(Duration::from_millis(200));

        let (_done_tx, done) = dones();
        let res = b.flush(&done).expect("flush");
        assert_eq!(res.len(), 1);
        assert!(res[0].failed_sectors.is_empty());

        // 0 + 60 * 3, never negative
        assert_eq!(chain.sent()[0].value, TokenAmount::from_atto(180));

        for h in handles {
            h.join().expect("join add").expect("add result");
        }
    }

    #[test]
    fn exactly_at_floor_aggregates() {
        let (chain, prover, b) = setup(SealingConfig {
            min_commit_batch: 4,
            ..Default::default()
        });
        *chain.initial_pledge.lock().expect("lock poisoned") = TokenAmount::from_atto(100);
        for sn in 1..=4 {
            record_precommit(&chain, sn, 40);
        }

        let handles: Vec<_> = (1..=4).map(|sn| spawn_add(&b, sn)).collect();
        thread::sleep(Duration::from_millis(200));

        let (_done_tx, done) = dones();
        let res = b.flush(&done).expect("flush");
        assert_eq!(res.len(), 1);
        assert_eq!(chain.sent().len(), 1);
        assert_eq!(chain.sent()[0].method, method::PROVE_COMMIT_AGGREGATE);
        assert_eq!(prover.requests.lock().expect("lock poisoned").len(), 1);

        for h in handles {
            h.join().expect("join add").expect("add result");
        }
    }

    #[test]
    fn stop_exits_without_firing() {
        let (chain, _prover, b) = setup(SealingConfig {
            min_commit_batch: 4,
            ..Default::default()
        });

        let (add_done_tx, add_done) = dones();
        let blocked = {
            let b = b.clone();
            thread::spawn(move || b.add_commit(&add_done, &sector(1), input(1)))
        };
        thread::sleep(Duration::from_millis(200));

        let (_done_tx, done) = dones();
        b.stop(&done).expect("stop");

        assert!(chain.sent().is_empty());

        drop(add_done_tx);
        assert!(blocked.join().expect("join add").is_err());

        let err = b
            .add_commit(&done, &sector(2), input(2))
            .expect_err("add after stop");
        assert!(err.to_string().contains("stopped"), "got {}", err);
    }
}
