//! batching configuration

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use fvm_shared::bigint::BigInt;
use fvm_shared::econ::TokenAmount;
use serde::{Deserialize, Serialize};
use toml::from_slice;

use crate::miner::{MAX_AGGREGATED_SECTORS, MIN_AGGREGATED_SECTORS, PRE_COMMIT_SECTOR_BATCH_MAX_SIZE};

/// batching windows & admission limits
#[derive(Debug, Clone)]
pub struct SealingConfig {
    /// ceiling on sectors waiting for deals; 0 = no limit
    pub max_wait_deals_sectors: u64,

    /// ceiling on deal-bearing sectors in the sealing pipeline; 0 = no limit
    pub max_sealing_sectors_for_deals: u64,

    /// whether pre-commits are batched at all
    pub batch_pre_commits: bool,

    /// upper bound on sectors per PreCommitSectorBatch message
    pub max_pre_commit_batch: usize,

    /// below this, a deadline wake does not fire a pre-commit batch
    pub min_pre_commit_batch: usize,

    /// ceiling on idle wait for a pre-commit batch regardless of deadlines
    pub pre_commit_batch_wait: Duration,

    /// margin subtracted from the earliest pre-commit deadline
    pub pre_commit_batch_slack: Duration,

    /// whether prove-commits are aggregated at all
    pub aggregate_commits: bool,

    /// below this, a deadline wake does not fire a commit batch
    pub min_commit_batch: usize,

    /// upper bound on sectors per ProveCommitAggregate message
    pub max_commit_batch: usize,

    /// ceiling on idle wait for a commit batch regardless of deadlines
    pub commit_batch_wait: Duration,

    /// margin subtracted from the earliest commit deadline
    pub commit_batch_slack: Duration,
}

impl Default for SealingConfig {
    fn default() -> Self {
        SealingConfig {
            max_wait_deals_sectors: 0,
            max_sealing_sectors_for_deals: 0,
            batch_pre_commits: true,
            max_pre_commit_batch: PRE_COMMIT_SECTOR_BATCH_MAX_SIZE,
            min_pre_commit_batch: 1,
            pre_commit_batch_wait: Duration::from_secs(24 * 3600),
            pre_commit_batch_slack: Duration::from_secs(3 * 3600),
            aggregate_commits: true,
            min_commit_batch: MIN_AGGREGATED_SECTORS as usize,
            max_commit_batch: MAX_AGGREGATED_SECTORS as usize,
            commit_batch_wait: Duration::from_secs(24 * 3600),
            commit_batch_slack: Duration::from_secs(3600),
        }
    }
}

/// per-message gas caps
#[derive(Debug, Clone)]
pub struct FeeConfig {
    /// gas cap for a PreCommitSectorBatch message
    pub max_pre_commit_gas_fee: TokenAmount,

    /// gas cap for a ProveCommitAggregate / ProveCommitSector message
    pub max_commit_gas_fee: TokenAmount,
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig {
            // 0.025 FIL
            max_pre_commit_gas_fee: TokenAmount::from_nano(25_000_000),
            // 0.05 FIL
            max_commit_gas_fee: TokenAmount::from_nano(50_000_000),
        }
    }
}

/// TOML form of the batching section; unset fields keep their defaults
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SealingOptional {
    /// ceiling on sectors waiting for deals
    pub max_wait_deals_sectors: Option<u64>,

    /// ceiling on deal-bearing sectors in the sealing pipeline
    pub max_sealing_sectors_for_deals: Option<u64>,

    /// whether pre-commits are batched at all
    pub batch_pre_commits: Option<bool>,

    /// upper bound on sectors per PreCommitSectorBatch message
    pub max_pre_commit_batch: Option<usize>,

    /// below this, a deadline wake does not fire a pre-commit batch
    pub min_pre_commit_batch: Option<usize>,

    /// ceiling on idle wait for a pre-commit batch
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub pre_commit_batch_wait: Option<Duration>,

    /// margin subtracted from the earliest pre-commit deadline
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub pre_commit_batch_slack: Option<Duration>,

    /// whether prove-commits are aggregated at all
    pub aggregate_commits: Option<bool>,

    /// below this, a deadline wake does not fire a commit batch
    pub min_commit_batch: Option<usize>,

    /// upper bound on sectors per ProveCommitAggregate message
    pub max_commit_batch: Option<usize>,

    /// ceiling on idle wait for a commit batch
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub commit_batch_wait: Option<Duration>,

    /// margin subtracted from the earliest commit deadline
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub commit_batch_slack: Option<Duration>,

    /// gas cap for a PreCommitSectorBatch message, in FIL ("0.025")
    pub max_pre_commit_gas_fee: Option<String>,

    /// gas cap for a prove-commit message, in FIL ("0.05")
    pub max_commit_gas_fee: Option<String>,
}

macro_rules! merge_fields {
    ($src:expr, $dst:expr, { $($field:ident,)+ }) => {
        $(
            if let Some(v) = $src.$field {
                $dst.$field = v;
            }
        )+
    };
}

impl SealingOptional {
    /// overlays the set fields onto the defaults
    pub fn customized(self) -> Result<(SealingConfig, FeeConfig)> {
        let mut cfg = SealingConfig::default();
        let mut fees = FeeConfig::default();

        merge_fields!(self, cfg, {
            max_wait_deals_sectors,
            max_sealing_sectors_for_deals,
            batch_pre_commits,
            max_pre_commit_batch,
            min_pre_commit_batch,
            pre_commit_batch_wait,
            pre_commit_batch_slack,
            aggregate_commits,
            min_commit_batch,
            max_commit_batch,
            commit_batch_wait,
            commit_batch_slack,
        });

        if let Some(s) = self.max_pre_commit_gas_fee {
            fees.max_pre_commit_gas_fee = parse_fil(&s)?;
        }

        if let Some(s) = self.max_commit_gas_fee {
            fees.max_commit_gas_fee = parse_fil(&s)?;
        }

        Ok((cfg, fees))
    }
}

/// top-level config file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// section for batching
    pub sealing: SealingOptional,
}

impl Config {
    /// load config from the reader
    pub fn from_reader<R: Read>(mut r: R) -> Result<Self> {
        let mut content = Vec::with_capacity(1 << 10);
        r.read_to_end(&mut content)?;

        let cfg = from_slice(&content)?;

        Ok(cfg)
    }

    /// load from config file
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self> {
        let f = File::open(p)?;
        Self::from_reader(f)
    }
}

/// callback through which the batchers re-read config at every firing
pub type GetSealingConfig = Arc<dyn Fn() -> Result<SealingConfig> + Send + Sync>;

/// wraps a fixed config into a [`GetSealingConfig`]
pub fn static_config(cfg: SealingConfig) -> GetSealingConfig {
    Arc::new(move || Ok(cfg.clone()))
}

/// parses a FIL-denominated decimal ("0.025", "1 FIL") into attoFIL
pub fn parse_fil(s: &str) -> Result<TokenAmount> {
    let s = s.trim();
    let s = s
        .strip_suffix("FIL")
        .or_else(|| s.strip_suffix("fil"))
        .unwrap_or(s)
        .trim();

    let (int, frac) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };

    if int.is_empty() && frac.is_empty() {
        return Err(anyhow!("empty FIL amount"));
    }

    if frac.len() > 18 {
        return Err(anyhow!("FIL amount {} has sub-attoFIL precision", s));
    }

    let atto_digits = format!("{}{:0<18}", int, frac);
    let atto = BigInt::parse_bytes(atto_digits.as_bytes(), 10)
        .ok_or_else(|| anyhow!("malformed FIL amount {}", s))?;

    if atto < BigInt::from(0) {
        return Err(anyhow!("negative FIL amount {}", s));
    }

    Ok(TokenAmount::from_atto(atto))
}
