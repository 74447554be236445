//! Efficiency × acceptance division and correlated-subset ratios.

use crate::histogram::{Hist1, Result};

/// Error-propagation mode of [`efficiency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffMode {
    /// Independent-Poisson ratio errors.
    SimpleRatio,
    /// Binomial errors `sqrt(p(1-p)/gen)`; valid when the reconstructed
    /// sample is a strict subset of the generated one.
    Binomial,
}

/// Bin-wise `reco / gen` with the requested error propagation.
///
/// Empty generated bins produce 0 ± 0 — a documented sentinel, never NaN.
/// With [`EffMode::Binomial`], `p` is clamped into `[0, 1]` before the
/// variance is formed so pathological inputs (reco > gen) cannot produce a
/// negative variance.
pub fn efficiency(reco: &Hist1, gen: &Hist1, mode: EffMode) -> Result<Hist1> {
    let mut eff = reco.clone();
    match mode {
        EffMode::SimpleRatio => {
            eff.divide(gen)?;
        }
        EffMode::Binomial => {
            // force the binning check through divide's error path
            let mut check = reco.clone();
            check.divide(gen)?;
            for i in 0..eff.n_bins() {
                let (r, g) = (reco.content(i), gen.content(i));
                if g <= 0.0 {
                    eff.set_bin(i, 0.0, 0.0)?;
                    continue;
                }
                let p = (r / g).clamp(0.0, 1.0);
                eff.set_bin(i, r / g, (p * (1.0 - p) / g).sqrt())?;
            }
        }
    }
    Ok(eff)
}

/// Bin-wise `sampled / skimmed` for a skimmed subset of a sampled dataset,
/// with the correlated-ratio error
/// `σ² = σ_sampled²/skimmed² + r²·σ_skimmed²/skimmed² − 2·r·σ_skimmed²/skimmed²`
/// (full correlation of the overlap, cov ≈ σ_skimmed²). The variance is
/// clamped at zero before the square root. Empty skimmed bins give 0 ± 0.
pub fn correlated_subset_ratio(sampled: &Hist1, skimmed: &Hist1) -> Result<Hist1> {
    // reuse divide for the binning check, then overwrite with correlated errors
    let mut ratio = sampled.clone();
    ratio.divide(skimmed)?;
    for i in 0..ratio.n_bins() {
        let (a, b) = (sampled.content(i), skimmed.content(i));
        if b <= 0.0 {
            ratio.set_bin(i, 0.0, 0.0)?;
            continue;
        }
        let r = a / b;
        let (ea2, eb2) = (sampled.error(i).powi(2), skimmed.error(i).powi(2));
        let var = (ea2 + r * r * eb2 - 2.0 * r * eb2) / (b * b);
        ratio.set_bin(i, r, var.max(0.0).sqrt())?;
    }
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pair(reco: &[f64], gen: &[f64]) -> (Hist1, Hist1) {
        let edges: Vec<f64> = (0..=reco.len()).map(|i| i as f64).collect();
        let mut r = Hist1::new_binned("reco", &edges).unwrap();
        let mut g = Hist1::new_binned("gen", &edges).unwrap();
        for (i, (&a, &b)) in reco.iter().zip(gen).enumerate() {
            r.set_bin(i, a, a.sqrt()).unwrap();
            g.set_bin(i, b, b.sqrt()).unwrap();
        }
        (r, g)
    }

    #[test]
    fn binomial_error_formula() {
        let (r, g) = pair(&[25.0], &[100.0]);
        let eff = efficiency(&r, &g, EffMode::Binomial).unwrap();
        assert_relative_eq!(eff.content(0), 0.25);
        assert_relative_eq!(eff.error(0), (0.25f64 * 0.75 / 100.0).sqrt());
    }

    #[test]
    fn binomial_zero_reco_is_zero_not_nan() {
        let (r, g) = pair(&[0.0], &[50.0]);
        let eff = efficiency(&r, &g, EffMode::Binomial).unwrap();
        assert_eq!(eff.content(0), 0.0);
        assert_eq!(eff.error(0), 0.0);
        assert!(eff.content(0).is_finite());
    }

    #[test]
    fn empty_generated_bin_is_sentinel() {
        let (r, g) = pair(&[5.0], &[0.0]);
        for mode in [EffMode::SimpleRatio, EffMode::Binomial] {
            let eff = efficiency(&r, &g, mode).unwrap();
            assert_eq!(eff.content(0), 0.0);
            assert_eq!(eff.error(0), 0.0);
        }
    }

    #[test]
    fn correlated_ratio_known_numbers() {
        // skimmed = 100 ± 10, sampled = 400 ± 20, ratio = 4:
        // σ = sqrt(0.04 + 0.16 − 0.08) = sqrt(0.12)
        let edges = [0.0, 1.0];
        let mut sampled = Hist1::new_binned("sampled", &edges).unwrap();
        let mut skimmed = Hist1::new_binned("skimmed", &edges).unwrap();
        sampled.set_bin(0, 400.0, 20.0).unwrap();
        skimmed.set_bin(0, 100.0, 10.0).unwrap();
        let ratio = correlated_subset_ratio(&sampled, &skimmed).unwrap();
        assert_relative_eq!(ratio.content(0), 4.0);
        assert_relative_eq!(ratio.error(0), 0.12f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn correlated_ratio_empty_skimmed_bin() {
        let edges = [0.0, 1.0];
        let mut sampled = Hist1::new_binned("sampled", &edges).unwrap();
        let skimmed = Hist1::new_binned("skimmed", &edges).unwrap();
        sampled.set_bin(0, 10.0, 3.0).unwrap();
        let ratio = correlated_subset_ratio(&sampled, &skimmed).unwrap();
        assert_eq!(ratio.content(0), 0.0);
        assert_eq!(ratio.error(0), 0.0);
    }
}
