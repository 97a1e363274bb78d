use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::{DType, Device, Tensor};

use crate::error::{RecordError, RecordResult};

/// Per-channel summary of one dataset column.
#[derive(Debug, Clone)]
pub struct FeatureStats {
    pub mean: Tensor,
    pub std: Tensor,
    pub min: Tensor,
    pub max: Tensor,
}

const STAT_NAMES: [&str; 4] = ["mean", "std", "min", "max"];

impl FeatureStats {
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        match name {
            "mean" => Some(&self.mean),
            "std" => Some(&self.std),
            "min" => Some(&self.min),
            "max" => Some(&self.max),
            _ => None,
        }
    }
}

/// Streaming sums over `(rows, channels)` batches, so columns never need to be
/// held in memory at once.
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: usize,
    sums: Option<Sums>,
}

#[derive(Debug, Clone)]
struct Sums {
    sum: Tensor,
    sum_sq: Tensor,
    min: Tensor,
    max: Tensor,
}

impl RunningStats {
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, batch: &Tensor) -> RecordResult<()> {
        let (rows, _) = batch.dims2()?;
        if rows == 0 {
            return Ok(());
        }
        let batch = batch.to_dtype(DType::F64)?;
        let sum = batch.sum(0)?;
        let sum_sq = batch.sqr()?.sum(0)?;
        let min = batch.min(0)?;
        let max = batch.max(0)?;

        self.sums = Some(match self.sums.take() {
            None => Sums {
                sum,
                sum_sq,
                min,
                max,
            },
            Some(acc) => Sums {
                sum: (acc.sum + sum)?,
                sum_sq: (acc.sum_sq + sum_sq)?,
                min: acc.min.minimum(&min)?,
                max: acc.max.maximum(&max)?,
            },
        });
        self.count += rows;
        Ok(())
    }

    /// Population statistics, stored as f32.
    pub fn finish(&self) -> RecordResult<FeatureStats> {
        let sums = self.sums.as_ref().ok_or(RecordError::EmptyDataset)?;
        let n = self.count as f64;
        let mean = sums.sum.affine(1.0 / n, 0.0)?;
        let var = (sums.sum_sq.affine(1.0 / n, 0.0)? - mean.sqr()?)?.relu()?;
        Ok(FeatureStats {
            mean: mean.to_dtype(DType::F32)?,
            std: var.sqrt()?.to_dtype(DType::F32)?,
            min: sums.min.to_dtype(DType::F32)?,
            max: sums.max.to_dtype(DType::F32)?,
        })
    }
}

/// Compute statistics of a whole column in one pass.
pub fn column_stats(rows: &Tensor) -> RecordResult<FeatureStats> {
    let mut stats = RunningStats::default();
    stats.update(rows)?;
    stats.finish()
}

/// Written as `<feature>/<stat>` tensors.
pub fn save_stats(stats: &BTreeMap<String, FeatureStats>, path: &Path) -> RecordResult<()> {
    let mut flat = HashMap::new();
    for (key, feature) in stats {
        for name in STAT_NAMES {
            if let Some(t) = feature.get(name) {
                flat.insert(format!("{key}/{name}"), t.clone());
            }
        }
    }
    candle_core::safetensors::save(&flat, path)?;
    Ok(())
}

pub fn load_stats(path: &Path) -> RecordResult<BTreeMap<String, FeatureStats>> {
    let mut flat = candle_core::safetensors::load(path, &Device::Cpu)?;
    let keys: Vec<String> = flat
        .keys()
        .filter_map(|k| k.rsplit_once('/').map(|(feature, _)| feature.to_string()))
        .collect();

    let mut stats = BTreeMap::new();
    for key in keys {
        if stats.contains_key(&key) {
            continue;
        }
        let mut take = |name: &str| {
            flat.remove(&format!("{key}/{name}")).ok_or_else(|| {
                RecordError::MalformedDataset(format!("stats for '{key}' are missing '{name}'"))
            })
        };
        let feature = FeatureStats {
            mean: take("mean")?,
            std: take("std")?,
            min: take("min")?,
            max: take("max")?,
        };
        stats.insert(key, feature);
    }
    Ok(stats)
}
