//! batching of pre-commit messages

use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Context, Result};
use cid::Cid;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use fvm_ipld_encoding::to_vec;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::{SectorID, SectorNumber};

use super::{sector_deadline, Done, PendingBatch, PreCommitBatchRes};
use crate::chain::{AddressSelector, MessagePurpose, PreCommitBatcherApi};
use crate::config::{FeeConfig, GetSealingConfig, SealingConfig};
use crate::logging::{error, info, warn};
use crate::miner::{method, PreCommitSectorBatchParams, SectorPreCommitInfo};
use crate::types::SectorInfo;

/// one sector's pre-commitment waiting for a batch
#[derive(Debug, Clone)]
pub struct PreCommitEntry {
    /// deposit the message must carry for this sector
    pub deposit: TokenAmount,

    /// the on-chain payload
    pub info: SectorPreCommitInfo,
}

type Pending = Arc<Mutex<PendingBatch<PreCommitEntry, PreCommitBatchRes>>>;

/// accumulates pre-commit entries and lands them in one
/// PreCommitSectorBatch message per firing
pub struct PreCommitBatcher {
    maddr: Address,
    api: Arc<dyn PreCommitBatcherApi>,
    pending: Pending,

    notify_tx: Sender<()>,
    force_tx: Sender<Sender<Vec<PreCommitBatchRes>>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stopped_rx: Receiver<()>,
}

impl PreCommitBatcher {
    /// starts the dispatcher and returns the control handle
    pub fn new(
        maddr: Address,
        api: Arc<dyn PreCommitBatcherApi>,
        addr_sel: Arc<dyn AddressSelector>,
        fee_cfg: FeeConfig,
        get_cfg: GetSealingConfig,
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
            pending: pending.clone(),
            notify_rx,
            force_rx,
            stop_rx,
            _stopped_tx: stopped_tx,
        };

        thread::spawn(move || dispatcher.run());

        PreCommitBatcher {
            maddr,
            api,
            pending,
            notify_tx,
            force_tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stopped_rx,
        }
    }

    /// registers the sector's pre-commitment and blocks until the batch
    /// containing it is dispatched, or `done` is cancelled
    ///
    /// cancellation unblocks this caller only; the entry stays enqueued
    /// and the batch may still reach the chain
    pub fn add_pre_commit(
        &self,
        done: &Done,
        sector: &SectorInfo,
        deposit: TokenAmount,
        info: SectorPreCommitInfo,
    ) -> Result<PreCommitBatchRes> {
        let (_, cur_epoch) = self.api.chain_head().context("getting chain head")?;

        let sn = sector.sector_number;
        let sent_rx = {
            let mut pending = self.pending.lock().expect("lock poisoned");
            let sent_rx = pending.add(sn, PreCommitEntry { deposit, info }, sector_deadline(cur_epoch, sector));

            match self.notify_tx.try_send(()) {
                // a pending notification is enough for any number of admissions
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    pending.withdraw(sn);
                    return Err(anyhow!("pre-commit batcher stopped"));
                }
            }

            sent_rx
        };

        select! {
            recv(sent_rx) -> res => res.context("pre-commit batch result channel broke"),
            recv(done) -> _ => Err(anyhow!("cancelled while waiting for the pre-commit batch")),
        }
    }

    /// forces a firing regardless of the size window; returns the results
    /// of the forced batch, empty if nothing was pending
    pub fn flush(&self, done: &Done) -> Result<Vec<PreCommitBatchRes>> {
        let (res_tx, res_rx) = bounded(1);

        select! {
            send(self.force_tx, res_tx) -> sent => {
                sent.map_err(|_| anyhow!("pre-commit batcher stopped"))?;

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
    api: Arc<dyn PreCommitBatcherApi>,
    addr_sel: Arc<dyn AddressSelector>,
    fee_cfg: FeeConfig,
    get_cfg: GetSealingConfig,
    pending: Pending,

    notify_rx: Receiver<()>,
    force_rx: Receiver<Sender<Vec<PreCommitBatchRes>>>,
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

        let mut force_res: Option<Sender<Vec<PreCommitBatchRes>>> = None;
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
                .next_timer(cfg.pre_commit_batch_wait, cfg.pre_commit_batch_slack);

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
                Err(e) => warn!("pre-commit batch processing: {:?}", e),
            }
        }
    }

    fn maybe_start_batch(&self, notif: bool, after: bool) -> Result<Vec<PreCommitBatchRes>> {
        let (total, entries) = {
            let pending = self.pending.lock().expect("lock poisoned");
            if pending.is_empty() {
                return Ok(Vec::new());
            }

            (pending.len(), pending.snapshot())
        };

        let cfg = (self.get_cfg)().context("getting sealing config")?;

        if notif && total < cfg.max_pre_commit_batch {
            return Ok(Vec::new());
        }

        if after && total < cfg.min_pre_commit_batch {
            return Ok(Vec::new());
        }

        let (mut res, err) = self.process_batch(&cfg, entries);
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

            let sectors = r.sectors.clone();
            pending.deliver(&sectors, r);
        }

        Ok(res)
    }

    fn process_batch(
        &self,
        cfg: &SealingConfig,
        entries: Vec<(SectorNumber, PreCommitEntry)>,
    ) -> (Vec<PreCommitBatchRes>, Option<anyhow::Error>) {
        let mut res = PreCommitBatchRes::default();
        let mut params = PreCommitSectorBatchParams::default();
        let mut deposit = TokenAmount::from_atto(0);

        for (sn, entry) in entries {
            if params.sectors.len() >= cfg.max_pre_commit_batch {
                info!("pre-commit batch full");
                break;
            }

            res.sectors.push(sn);
            params.sectors.push(entry.info);
            deposit = &deposit + &entry.deposit;
        }

        match self.send_batch(params, &deposit) {
            Ok(mcid) => {
                res.msg = Some(mcid);
                (vec![res], None)
            }
            Err(e) => (vec![res], Some(e)),
        }
    }

    fn send_batch(&self, params: PreCommitSectorBatchParams, deposit: &TokenAmount) -> Result<Cid> {
        let sectors = params.sectors.len();
        let enc = to_vec(&params).context("couldn't serialize PreCommitSectorBatchParams")?;

        let mi = self
            .api
            .state_miner_info(&self.maddr, None)
            .context("couldn't get miner info")?;

        let good_funds = deposit + &self.fee_cfg.max_pre_commit_gas_fee;
        let (from, _) = self
            .addr_sel
            .select_address(&mi, MessagePurpose::PreCommit, &good_funds, deposit)
            .context("no good address found")?;

        let mcid = self
            .api
            .send_msg(
                &from,
                &self.maddr,
                method::PRE_COMMIT_SECTOR_BATCH,
                deposit.clone(),
                self.fee_cfg.max_pre_commit_gas_fee.clone(),
                enc,
            )
            .context("sending message failed")?;

        info!("sent PreCommitSectorBatch message cid={} from={} sectors={}", mcid, from, sectors);

        Ok(mcid)
    }
}
