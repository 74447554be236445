//! The trial scanner: Cartesian cut-threshold enumeration and the
//! default-plus-trials ensemble.

use rayon::prelude::*;

use hx_core::config::{CutFamily, CutFamilyGrid};

use crate::selection::Selection;

/// Ordered cut-family grids defining the trial space.
#[derive(Debug, Clone)]
pub struct CutGrid {
    families: Vec<(CutFamily, Vec<f64>)>,
}

impl CutGrid {
    /// Build from the configured family order.
    pub fn from_config(grids: &[CutFamilyGrid]) -> Self {
        Self { families: grids.iter().map(|g| (g.family, g.values.clone())).collect() }
    }

    /// Number of trials: the product of the family list lengths.
    pub fn n_trials(&self) -> usize {
        self.families.iter().map(|(_, v)| v.len()).product()
    }

    /// Every threshold combination, in nested iteration order: the first
    /// configured family is the outermost loop, the last the innermost.
    /// Downstream consumers address ensemble entries positionally, so this
    /// ordering is part of the contract.
    pub fn combinations(&self) -> Vec<Vec<(CutFamily, f64)>> {
        let mut combos: Vec<Vec<(CutFamily, f64)>> = vec![Vec::new()];
        for (family, values) in &self.families {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for &value in values {
                    let mut c = combo.clone();
                    c.push((*family, value));
                    next.push(c);
                }
            }
            combos = next;
        }
        combos
    }
}

/// The default entry plus the ordered trial entries. The default is never a
/// member of a swept list; indexing is explicit rather than positional.
#[derive(Debug, Clone)]
pub struct Ensemble<T> {
    /// Result of the baseline selection.
    pub default: T,
    /// Trial results, ordered by trial index.
    pub trials: Vec<T>,
}

impl<T> Ensemble<T> {
    /// Namespace name of an entry: `None` → the default (`nuclei`),
    /// `Some(i)` → trial `i` (`nuclei<i>`).
    pub fn namespace(filter: &str, index: Option<usize>) -> String {
        match index {
            None => filter.to_string(),
            Some(i) => format!("{filter}{i}"),
        }
    }

    /// Iterate `(namespace index, entry)` with the default first.
    pub fn iter_indexed(&self) -> impl Iterator<Item = (Option<usize>, &T)> {
        std::iter::once((None, &self.default))
            .chain(self.trials.iter().enumerate().map(|(i, t)| (Some(i), t)))
    }
}

/// Run `pass` once with the baseline selection (`index = None`) and once
/// per threshold combination (`index = Some(i)`). Trials share no mutable
/// state and run on the rayon pool; results are collected by trial index,
/// so the ordering is deterministic regardless of scheduling.
pub fn scan<T, F>(grid: &CutGrid, baseline: &Selection, pass: F) -> Ensemble<T>
where
    T: Send,
    F: Fn(&Selection, Option<usize>) -> T + Sync,
{
    let default = pass(baseline, None);
    let combos = grid.combinations();
    let trials: Vec<T> = combos
        .par_iter()
        .enumerate()
        .map(|(i, combo)| {
            let sel = combo
                .iter()
                .fold(baseline.clone(), |sel, &(family, value)| sel.with_cut(family, value));
            pass(&sel, Some(i))
        })
        .collect();
    Ensemble { default, trials }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx_core::AnalysisConfig;

    fn grid_333() -> CutGrid {
        CutGrid::from_config(&[
            CutFamilyGrid { family: CutFamily::NsigmaDcaZ, values: vec![6.0, 7.0, 8.0] },
            CutFamilyGrid { family: CutFamily::TpcClusters, values: vec![110.0, 120.0, 130.0] },
            CutFamilyGrid { family: CutFamily::ItsClusters, values: vec![5.0, 6.0, 7.0] },
        ])
    }

    #[test]
    fn cartesian_product_size_and_order() {
        let grid = grid_333();
        assert_eq!(grid.n_trials(), 27);
        let combos = grid.combinations();
        assert_eq!(combos.len(), 27);
        // first family outermost: it changes every 9 combinations,
        // the last family changes every combination
        assert_eq!(combos[0], vec![
            (CutFamily::NsigmaDcaZ, 6.0),
            (CutFamily::TpcClusters, 110.0),
            (CutFamily::ItsClusters, 5.0),
        ]);
        assert_eq!(combos[1][2], (CutFamily::ItsClusters, 6.0));
        assert_eq!(combos[3][1], (CutFamily::TpcClusters, 120.0));
        assert_eq!(combos[9][0], (CutFamily::NsigmaDcaZ, 7.0));
        assert_eq!(combos[26], vec![
            (CutFamily::NsigmaDcaZ, 8.0),
            (CutFamily::TpcClusters, 130.0),
            (CutFamily::ItsClusters, 7.0),
        ]);
    }

    #[test]
    fn scan_is_deterministic_under_concurrency() {
        let cfg = AnalysisConfig::default();
        let baseline = Selection::from_config(&cfg);
        let grid = grid_333();
        let run = |sel: &Selection, _idx: Option<usize>| {
            (
                sel.primary.max_dca_z_nsigma,
                sel.primary.min_tpc_clusters,
                sel.primary.min_its_clusters,
            )
        };
        let a = scan(&grid, &baseline, run);
        let b = scan(&grid, &baseline, run);
        assert_eq!(a.trials.len(), 27);
        assert_eq!(a.trials, b.trials);
        assert_eq!(a.trials[0], (6.0, 110.0, 5.0));
        assert_eq!(a.trials[26], (8.0, 130.0, 7.0));
        // the default keeps the baseline thresholds, not a swept value
        assert_eq!(a.default, (7.0, 120.0, 6.0));
    }

    #[test]
    fn namespace_naming() {
        assert_eq!(Ensemble::<()>::namespace("nuclei", None), "nuclei");
        assert_eq!(Ensemble::<()>::namespace("nuclei", Some(3)), "nuclei3");
    }
}
