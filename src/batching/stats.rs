//! per-sector lifecycle counters driving upstream admission control

use std::collections::HashMap;
use std::sync::Mutex;

use fvm_shared::sector::SectorID;

use crate::config::SealingConfig;
use crate::logging::debug;
use crate::types::SectorState;

/// four-bucket projection of the sealing pipeline's state space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum StatSectorState {
    /// waiting to enter the pipeline
    Staging = 0,

    /// somewhere in the sealing pipeline
    Sealing = 1,

    /// stuck in a failure state
    Failed = 2,

    /// sealed and proving (or on the way out)
    Proving = 3,
}

const N_STAT_STATES: usize = 4;

fn to_stat_state(st: SectorState) -> StatSectorState {
    use SectorState::*;

    match st {
        Empty | WaitDeals => StatSectorState::Staging,

        Proving | Faulty | Terminating | TerminateWait | Removing | Removed => StatSectorState::Proving,

        PackingFailed | SealPreCommit1Failed | SealPreCommit2Failed | PreCommitFailed | ComputeProofFailed
        | CommitFailed | FinalizeFailed => StatSectorState::Failed,

        _ => StatSectorState::Sealing,
    }
}

#[derive(Default)]
struct Counters {
    by_sector: HashMap<(u64, u64), StatSectorState>,
    totals: [u64; N_STAT_STATES],
}

impl Counters {
    // sectors occupying a pipeline slot: not yet done, failures included
    fn cur_sealing(&self) -> u64 {
        self.totals[StatSectorState::Staging as usize]
            + self.totals[StatSectorState::Sealing as usize]
            + self.totals[StatSectorState::Failed as usize]
    }

    fn cur_staging(&self) -> u64 {
        self.totals[StatSectorState::Staging as usize]
    }
}

/// tracks every observed sector's projected state and signals when a
/// configured admission ceiling is crossed downward
#[derive(Default)]
pub struct SectorStats {
    counters: Mutex<Counters>,
}

impl SectorStats {
    /// records a sector's state transition; the returned flag asks the
    /// caller to re-trigger deal input upstream, and is set when the
    /// update moves a previously-full pipeline back under one of the
    /// configured limits
    pub fn update_sector(&self, cfg: &SealingConfig, id: SectorID, st: SectorState) -> bool {
        let mut counters = self.counters.lock().expect("lock poisoned");

        let pre_sealing = counters.cur_sealing();
        let pre_staging = counters.cur_staging();

        let sst = to_stat_state(st);
        if let Some(old) = counters.by_sector.insert((id.miner, id.number), sst) {
            counters.totals[old as usize] -= 1;
        }
        counters.totals[sst as usize] += 1;

        let sealing = counters.cur_sealing();
        let staging = counters.cur_staging();

        debug!("sector stats sealing={} staging={}", sealing, staging);

        let mut update_input = false;

        if cfg.max_sealing_sectors_for_deals > 0
            && pre_sealing >= cfg.max_sealing_sectors_for_deals
            && sealing < cfg.max_sealing_sectors_for_deals
        {
            update_input = true;
        }

        if cfg.max_wait_deals_sectors > 0
            && pre_staging >= cfg.max_wait_deals_sectors
            && staging < cfg.max_wait_deals_sectors
        {
            update_input = true;
        }

        update_input
    }

    /// sectors currently in the sealing pipeline
    pub fn cur_sealing(&self) -> u64 {
        self.counters.lock().expect("lock poisoned").cur_sealing()
    }

    /// sectors waiting to enter the sealing pipeline
    pub fn cur_staging(&self) -> u64 {
        self.counters.lock().expect("lock poisoned").cur_staging()
    }
}

#[cfg(test)]
mod tests {
    use fvm_shared::sector::SectorID;
    use pretty_assertions::assert_eq;

    use super::SectorStats;
    use crate::config::SealingConfig;
    use crate::types::SectorState;

    fn sid(number: u64) -> SectorID {
        SectorID { miner: 1000, number }
    }

    #[test]
    fn buckets_follow_transitions() {
        let stats = SectorStats::default();
        let cfg = SealingConfig::default();

        stats.update_sector(&cfg, sid(1), SectorState::WaitDeals);
        stats.update_sector(&cfg, sid(2), SectorState::PreCommit1);
        stats.update_sector(&cfg, sid(3), SectorState::CommitFailed);

        assert_eq!(stats.cur_staging(), 1);
        assert_eq!(stats.cur_sealing(), 3);

        // re-reporting a sector moves it between buckets, not duplicates it
        stats.update_sector(&cfg, sid(1), SectorState::Packing);
        assert_eq!(stats.cur_staging(), 0);
        assert_eq!(stats.cur_sealing(), 3);

        stats.update_sector(&cfg, sid(2), SectorState::Proving);
        assert_eq!(stats.cur_sealing(), 2);
    }

    #[test]
    fn signals_on_downward_crossing_of_sealing_limit() {
        let stats = SectorStats::default();
        let cfg = SealingConfig {
            max_sealing_sectors_for_deals: 2,
            ..Default::default()
        };

        assert!(!stats.update_sector(&cfg, sid(1), SectorState::PreCommit1));
        assert!(!stats.update_sector(&cfg, sid(2), SectorState::PreCommit1));

        // at the limit; finishing one sector frees a slot
        assert!(stats.update_sector(&cfg, sid(1), SectorState::Proving));

        // already under the limit, no repeated signal
        assert!(!stats.update_sector(&cfg, sid(2), SectorState::Proving));
    }

    #[test]
    fn signals_on_downward_crossing_of_staging_limit() {
        let stats = SectorStats::default();
        let cfg = SealingConfig {
            max_wait_deals_sectors: 1,
            ..Default::default()
        };

        assert!(!stats.update_sector(&cfg, sid(1), SectorState::WaitDeals));
        assert!(stats.update_sector(&cfg, sid(1), SectorState::Packing));
    }

    #[test]
    fn no_signal_when_limits_unset() {
        let stats = SectorStats::default();
        let cfg = SealingConfig::default();

        assert!(!stats.update_sector(&cfg, sid(1), SectorState::WaitDeals));
        assert!(!stats.update_sector(&cfg, sid(1), SectorState::Proving));
    }
}
