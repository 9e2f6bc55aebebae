//! Trial schedule: the configuration cross-product, repeated and interleaved.

use crate::config::CampaignConfig;
use crate::data::record::CellKey;
use crate::error::LeakError;
use crate::types::CampaignKind;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

/// One scheduled trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTrial {
    /// Position in the schedule.
    pub index: usize,
    pub cell: CellKey,
    pub repetition: usize,
}

/// A campaign's full, ordered trial schedule.
#[derive(Debug, Clone)]
pub struct CampaignPlan {
    cells: Vec<CellKey>,
    trials: Vec<PlannedTrial>,
}

impl CampaignPlan {
    /// Enumerate every cell, repeat it `repetitions_per_config` times and
    /// shuffle the result with the campaign seed.
    ///
    /// Interleaving spreads transient host load across all cells instead of
    /// letting it land on one configuration's consecutive repetitions.
    pub fn from_config(config: &CampaignConfig) -> Result<Self, LeakError> {
        config.validate()?;
        let cells = enumerate_cells(config);

        let mut trials: Vec<PlannedTrial> = cells
            .iter()
            .flat_map(|cell| {
                (0..config.repetitions_per_config).map(move |repetition| PlannedTrial {
                    index: 0,
                    cell: *cell,
                    repetition,
                })
            })
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);
        trials.shuffle(&mut rng);
        for (index, trial) in trials.iter_mut().enumerate() {
            trial.index = index;
        }

        Ok(Self { cells, trials })
    }

    /// Drop trials for which `done` already holds a successful record.
    pub fn skip_completed(mut self, done: &HashSet<(CellKey, usize)>) -> Self {
        self.trials
            .retain(|t| !done.contains(&(t.cell, t.repetition)));
        self
    }

    pub fn cells(&self) -> &[CellKey] {
        &self.cells
    }

    pub fn trials(&self) -> &[PlannedTrial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

fn enumerate_cells(config: &CampaignConfig) -> Vec<CellKey> {
    let secrets: Vec<Option<_>> = match config.kind {
        CampaignKind::Secret => config.secret_levels.iter().copied().map(Some).collect(),
        CampaignKind::Workload => vec![None],
    };
    let mut cells = Vec::with_capacity(config.cell_count());
    for &workload_type in &config.workloads {
        for &intensity_level in &config.intensity_levels {
            for &mitigation_level in &config.mitigation_levels {
                for &secret_level in &secrets {
                    cells.push(CellKey {
                        workload_type,
                        intensity_level,
                        mitigation_level,
                        secret_level,
                    });
                }
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MitigationLevel;
    use std::collections::HashMap;

    #[test]
    fn test_plan_covers_cross_product() {
        let config = CampaignConfig::default();
        let plan = CampaignPlan::from_config(&config).unwrap();
        assert_eq!(plan.cells().len(), 36);
        assert_eq!(plan.len(), 36 * 30);

        let mut per_cell: HashMap<CellKey, usize> = HashMap::new();
        for t in plan.trials() {
            *per_cell.entry(t.cell).or_default() += 1;
        }
        assert!(per_cell.values().all(|n| *n == 30));
    }

    #[test]
    fn test_plan_is_interleaved_and_reproducible() {
        let config = CampaignConfig::default();
        let a = CampaignPlan::from_config(&config).unwrap();
        let b = CampaignPlan::from_config(&config).unwrap();
        assert_eq!(a.trials(), b.trials());

        // the first few trials do not all belong to one cell
        let first = a.trials()[0].cell;
        assert!(a.trials()[..10].iter().any(|t| t.cell != first));
        assert!(a.trials().iter().enumerate().all(|(i, t)| t.index == i));
    }

    #[test]
    fn test_different_seed_changes_order() {
        let a = CampaignPlan::from_config(&CampaignConfig::default()).unwrap();
        let config = CampaignConfig {
            random_seed: 1337,
            ..CampaignConfig::default()
        };
        let b = CampaignPlan::from_config(&config).unwrap();
        assert_ne!(a.trials(), b.trials());
    }

    #[test]
    fn test_secret_plan_has_secret_cells() {
        let config = CampaignConfig {
            repetitions_per_config: 2,
            ..CampaignConfig::secret_campaign()
        };
        let plan = CampaignPlan::from_config(&config).unwrap();
        assert_eq!(plan.cells().len(), 12);
        assert!(plan.cells().iter().all(|c| c.secret_level.is_some()));
    }

    #[test]
    fn test_skip_completed() {
        let config = CampaignConfig {
            repetitions_per_config: 2,
            mitigation_levels: vec![MitigationLevel::None],
            ..CampaignConfig::default()
        };
        let plan = CampaignPlan::from_config(&config).unwrap();
        let total = plan.len();
        let done: HashSet<_> = plan
            .trials()
            .iter()
            .take(3)
            .map(|t| (t.cell, t.repetition))
            .collect();
        assert_eq!(plan.skip_completed(&done).len(), total - 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CampaignConfig {
            repetitions_per_config: 0,
            ..CampaignConfig::default()
        };
        assert!(CampaignPlan::from_config(&config).is_err());
    }
}
