//! deadline-driven batchers for sector commitment messages, plus the
//! arithmetic they share

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cid::Cid;
use crossbeam_channel::{after, bounded, never, Receiver, Sender};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::sector::{SectorID, SectorNumber};
use fvm_shared::ActorID;

use crate::miner::{BLOCK_DELAY_SECS, MAX_PRE_COMMIT_RANDOMNESS_LOOKBACK};
use crate::types::SectorInfo;

pub mod commit;
pub mod precommit;
pub mod stats;

/// caller-side cancellation handle; dropping the sender half unblocks
/// whoever is waiting on it
pub type Done = Receiver<()>;

/// return done tx & rx
pub fn dones() -> (Sender<()>, Done) {
    bounded(0)
}

/// outcome of one pre-commit batch, delivered to every waiter of every
/// included sector
#[derive(Debug, Clone, Default)]
pub struct PreCommitBatchRes {
    /// sectors covered by the message
    pub sectors: Vec<SectorNumber>,

    /// cid of the sent message; None when `error` is set
    pub msg: Option<Cid>,

    /// set when the whole batch failed
    pub error: Option<String>,
}

/// outcome of one commit batch
#[derive(Debug, Clone, Default)]
pub struct CommitBatchRes {
    /// sectors covered by the message
    pub sectors: Vec<SectorNumber>,

    /// sectors dropped from the batch, with the reason; empty on full success
    pub failed_sectors: HashMap<SectorNumber, String>,

    /// cid of the sent message; None when `error` is set
    pub msg: Option<Cid>,

    /// set when the whole batch failed
    pub error: Option<String>,
}

/// latest wall-clock instant by which the sector's message must be sent:
/// ticket randomness expiry capped by the earliest bound deal start
pub fn sector_deadline(cur_epoch: ChainEpoch, sector: &SectorInfo) -> Instant {
    let mut deadline_epoch = sector.ticket_epoch + MAX_PRE_COMMIT_RANDOMNESS_LOOKBACK;
    if let Some(start) = sector.earliest_deal_start() {
        if start < deadline_epoch {
            deadline_epoch = start;
        }
    }

    let now = Instant::now();
    if deadline_epoch <= cur_epoch {
        return now;
    }

    now + Duration::from_secs((deadline_epoch - cur_epoch) as u64 * BLOCK_DELAY_SECS)
}

/// the three per-sector tables a batcher keeps between firings; entries
/// are admitted and cleared across all three together
pub(crate) struct PendingBatch<E, R> {
    todo: HashMap<SectorNumber, E>,
    deadlines: HashMap<SectorNumber, Instant>,
    waiting: HashMap<SectorNumber, Vec<Sender<R>>>,
}

impl<E, R: Clone> PendingBatch<E, R> {
    pub(crate) fn new() -> Self {
        PendingBatch {
            todo: HashMap::new(),
            deadlines: HashMap::new(),
            waiting: HashMap::new(),
        }
    }

    /// records the entry & deadline and arms a buffered one-shot waiter
    /// for the containing batch's result; re-adding a sector replaces its
    /// entry and queues another waiter
    pub(crate) fn add(&mut self, sn: SectorNumber, entry: E, deadline: Instant) -> Receiver<R> {
        self.todo.insert(sn, entry);
        self.deadlines.insert(sn, deadline);

        let (sent_tx, sent_rx) = bounded(1);
        self.waiting.entry(sn).or_default().push(sent_tx);

        sent_rx
    }

    /// drops a sector from all three tables without delivering anything
    pub(crate) fn withdraw(&mut self, sn: SectorNumber) {
        self.todo.remove(&sn);
        self.deadlines.remove(&sn);
        self.waiting.remove(&sn);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.todo.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.todo.len()
    }

    /// clones out the current entries, in no particular order
    pub(crate) fn snapshot(&self) -> Vec<(SectorNumber, E)>
    where
        E: Clone,
    {
        self.todo.iter().map(|(sn, e)| (*sn, e.clone())).collect()
    }

    /// sends `res` to every waiter of every listed sector and clears those
    /// sectors; waiter channels are buffered so delivery never blocks
    pub(crate) fn deliver(&mut self, sectors: &[SectorNumber], res: &R) {
        for sn in sectors {
            if let Some(waiters) = self.waiting.remove(sn) {
                for w in waiters {
                    let _ = w.try_send(res.clone());
                }
            }

            self.todo.remove(sn);
            self.deadlines.remove(sn);
        }
    }

    /// timer for the next deadline-driven wake; inert while nothing is
    /// pending, otherwise fires at the earliest deadline minus slack,
    /// capped at `max_wait` and floored at one nanosecond
    pub(crate) fn next_timer(&self, max_wait: Duration, slack: Duration) -> Receiver<Instant> {
        if self.todo.is_empty() {
            return never();
        }

        let now = Instant::now();
        let wait = match self.deadlines.values().min() {
            None => max_wait,
            Some(deadline) => match deadline.checked_sub(slack) {
                Some(target) if target > now => (target - now).min(max_wait),
                _ => Duration::from_nanos(1),
            },
        };

        let wait = if wait.is_zero() { Duration::from_nanos(1) } else { wait };

        after(wait)
    }

    /// pending sector ids sorted ascending by (miner, number)
    pub(crate) fn sorted_ids(&self, miner: ActorID) -> Vec<SectorID> {
        let mut ids: Vec<_> = self
            .todo
            .keys()
            .map(|sn| SectorID { miner, number: *sn })
            .collect();

        ids.sort_by(|a, b| a.miner.cmp(&b.miner).then(a.number.cmp(&b.number)));

        ids
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use super::{sector_deadline, PendingBatch};
    use crate::miner::MAX_PRE_COMMIT_RANDOMNESS_LOOKBACK;
    use crate::types::{DealSchedule, PieceDealInfo, SectorInfo, SectorPiece};

    fn sector(number: u64, ticket_epoch: i64, deal_starts: &[i64]) -> SectorInfo {
        SectorInfo {
            sector_number: number,
            ticket_epoch,
            pieces: deal_starts
                .iter()
                .map(|start| SectorPiece {
                    deal_info: Some(PieceDealInfo {
                        deal_id: 1,
                        deal_schedule: DealSchedule {
                            start_epoch: *start,
                            end_epoch: start + 180 * 2880,
                        },
                    }),
                })
                .collect(),
        }
    }

    #[test]
    fn deadline_prefers_earliest_deal_start() {
        let cur = 1000;
        let si = sector(1, 1000, &[1010, 1005]);

        let deadline = sector_deadline(cur, &si);
        let wait = deadline - Instant::now();

        // 5 epochs out at 30s per epoch
        assert!(wait > Duration::from_secs(145) && wait <= Duration::from_secs(150), "wait {:?}", wait);
    }

    #[test]
    fn deadline_defaults_to_randomness_expiry() {
        let cur = 1000;
        let si = sector(1, 990, &[]);

        let deadline = sector_deadline(cur, &si);
        let wait = deadline - Instant::now();

        let expect = (990 + MAX_PRE_COMMIT_RANDOMNESS_LOOKBACK - cur) as u64 * 30;
        assert!(
            wait > Duration::from_secs(expect - 5) && wait <= Duration::from_secs(expect),
            "wait {:?}",
            wait
        );
    }

    #[test]
    fn past_due_deadline_is_now() {
        let si = sector(1, 0, &[5]);

        let deadline = sector_deadline(10_000, &si);
        assert!(deadline <= Instant::now());
    }

    #[test]
    fn timer_is_inert_while_empty() {
        let pending: PendingBatch<(), ()> = PendingBatch::new();
        let timer = pending.next_timer(Duration::from_nanos(1), Duration::ZERO);

        std::thread::sleep(Duration::from_millis(20));
        assert!(timer.try_recv().is_err());
    }

    #[test]
    fn timer_fires_immediately_when_past_due() {
        let mut pending: PendingBatch<u8, ()> = PendingBatch::new();
        let _rx = pending.add(1, 0, Instant::now());

        let timer = pending.next_timer(Duration::from_secs(3600), Duration::from_secs(60));
        assert!(timer.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn delivery_clears_only_listed_sectors() {
        let mut pending: PendingBatch<u8, u8> = PendingBatch::new();
        let deadline = Instant::now() + Duration::from_secs(60);

        let rx1 = pending.add(1, 10, deadline);
        let rx2 = pending.add(2, 20, deadline);
        let rx2b = pending.add(2, 21, deadline);
        let _rx3 = pending.add(3, 30, deadline);

        pending.deliver(&[1, 2], &7);

        assert_eq!(rx1.try_recv().ok(), Some(7));
        assert_eq!(rx2.try_recv().ok(), Some(7));
        assert_eq!(rx2b.try_recv().ok(), Some(7));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.sorted_ids(1000)[0].number, 3);
    }
}
