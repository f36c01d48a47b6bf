//! Per (tag, reader-antenna) read statistics
//!
//! Signal strength is averaged in the linear power domain (mW) and converted
//! back to dBm on demand. All aggregates are streaming; no samples are kept.

use serde::Serialize;

#[inline]
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

#[inline]
pub fn mw_to_dbm(mw: f64) -> f64 {
    mw.log10() * 10.0
}

/// Welford running mean/variance with min and max
#[derive(Debug, Clone, Copy, Default)]
struct Running {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Running {
    fn push(&mut self, x: f64) {
        self.n += 1;
        if self.n == 1 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn mean(&self) -> f64 {
        if self.n == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Sample standard deviation; zero for a single sample
    fn std_dev(&self) -> f64 {
        match self.n {
            0 => f64::NAN,
            1 => 0.0,
            n => (self.m2 / (n - 1) as f64).sqrt(),
        }
    }
}

/// Derived statistics in one unit domain
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsResults {
    pub last_read: u64,
    pub n: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReadStats {
    last_read: Option<u64>,
    rssi_mw: Running,
    rssi_dbm: Running,
    read_interval: Running,
}

impl ReadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the aggregate
    pub fn update(&mut self, read_time_ms: u64, rssi_dbm: f64) {
        if let Some(prev) = self.last_read {
            self.read_interval.push(read_time_ms as f64 - prev as f64);
        }
        self.last_read = Some(read_time_ms);
        self.rssi_mw.push(dbm_to_mw(rssi_dbm));
        self.rssi_dbm.push(rssi_dbm);
    }

    #[inline]
    pub fn n(&self) -> u64 {
        self.rssi_mw.n
    }

    /// Time of the most recent read, 0 if never read
    #[inline]
    pub fn last_read(&self) -> u64 {
        self.last_read.unwrap_or(0)
    }

    /// Power-averaged mean signal strength in dBm
    #[inline]
    pub fn rssi_mean_dbm(&self) -> f64 {
        mw_to_dbm(self.rssi_mw.mean())
    }

    pub fn read_interval_mean(&self) -> f64 {
        self.read_interval.mean()
    }

    pub fn read_interval_std_dev(&self) -> f64 {
        self.read_interval.std_dev()
    }

    /// Results in dBm. The mean is power-averaged; the spread is taken in dBm.
    pub fn in_dbm(&self) -> StatsResults {
        StatsResults {
            last_read: self.last_read(),
            n: self.n(),
            mean: self.rssi_mean_dbm(),
            std_dev: self.rssi_dbm.std_dev(),
            min: mw_to_dbm(self.rssi_mw.min),
            max: mw_to_dbm(self.rssi_mw.max),
        }
    }

    pub fn in_milliwatts(&self) -> StatsResults {
        StatsResults {
            last_read: self.last_read(),
            n: self.n(),
            mean: self.rssi_mw.mean(),
            std_dev: self.rssi_mw.std_dev(),
            min: self.rssi_mw.min,
            max: self.rssi_mw.max,
        }
    }
}
