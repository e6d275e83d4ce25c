//! Classify queries based on distance to reference genomes.
//!
//! A query matches a taxon when its distance to one of the taxon's reference
//! genomes is within the taxon's classification threshold, walking from the
//! genome's assigned taxon toward the root until a threshold is satisfied.
//! Non-strict mode considers only the closest reference genome. Strict mode
//! collects the matched taxa of every reference genome and reconciles them
//! into a consensus.

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;

use crate::db::models::{AnnotatedGenome, TaxonId, Taxonomy};
use crate::errors::{GambitError, Result};
use crate::metric::validate_dists;

/// Most specific taxon in the ancestry of `taxon` (inclusive) whose distance
/// threshold is defined and satisfied by `d`.
pub fn matching_taxon(taxonomy: &Taxonomy, taxon: TaxonId, d: f32) -> Option<TaxonId> {
    taxonomy.ancestors(taxon, true).find(|&t| {
        taxonomy
            .get(t)
            .distance_threshold
            .is_some_and(|threshold| f64::from(d) <= threshold)
    })
}

/// Next most specific taxon in the lineage of `taxon` whose threshold is
/// defined but *not* met at distance `d`, i.e. the taxon the query barely
/// missed.
/// `None` if the threshold is already met at the most specific level.
pub fn next_taxon(taxonomy: &Taxonomy, taxon: TaxonId, d: f32) -> Option<TaxonId> {
    let mut lo: Option<TaxonId> = None;
    let mut hi = Some(taxon);

    while let Some(t) = hi {
        let node = taxonomy.get(t);
        if node
            .distance_threshold
            .is_some_and(|threshold| f64::from(d) <= threshold)
        {
            return lo;
        }

        lo = Some(t);

        // Advance to the next ancestor that carries a threshold.
        hi = node.parent;
        while let Some(p) = hi {
            if taxonomy.get(p).distance_threshold.is_some() {
                break;
            }
            hi = taxonomy.get(p).parent;
        }
    }

    lo
}

/// Map from matched taxa to the indices of the genomes that produced the
/// match. Insertion order follows the genome list, making results
/// reproducible.
pub fn find_matches(
    taxonomy: &Taxonomy,
    genomes: &[AnnotatedGenome],
    dists: &[f32],
) -> Vec<(TaxonId, Vec<usize>)> {
    let mut order: Vec<(TaxonId, Vec<usize>)> = Vec::new();
    let mut position: HashMap<TaxonId, usize> = HashMap::new();

    for (i, (genome, &d)) in genomes.iter().zip(dists).enumerate() {
        if let Some(taxon) = matching_taxon(taxonomy, genome.taxon, d) {
            match position.get(&taxon) {
                Some(&p) => order[p].1.push(i),
                None => {
                    position.insert(taxon, order.len());
                    order.push((taxon, vec![i]));
                }
            }
        }
    }

    order
}

/// Reduce a set of matched taxa to a single consensus taxon.
///
/// When all taxa lie in a single lineage, the most specific is the consensus
/// and the discordant set is empty. Otherwise the consensus is the lowest
/// taxon which is an ancestor or descendant of every input, and the
/// discordant set contains the inputs strictly descended from it. Inputs in
/// entirely different trees have no consensus.
pub fn consensus_taxon(
    taxonomy: &Taxonomy,
    taxa: &[TaxonId],
) -> (Option<TaxonId>, BTreeSet<TaxonId>) {
    let Some(&first) = taxa.first() else {
        return (None, BTreeSet::new());
    };

    // Current consensus and its ancestors, bottom to top.
    let mut trunk: Vec<TaxonId> = taxonomy.ancestors(first, true).collect();

    for &taxon in &taxa[1..] {
        if trunk.contains(&taxon) {
            continue;
        }

        // Find where this taxon's ancestry meets the current trunk.
        let mut met = false;
        for ancestor in taxonomy.ancestors(taxon, false) {
            if let Some(i) = trunk.iter().position(|&t| t == ancestor) {
                if i == 0 {
                    // Directly descended from the current consensus; the
                    // new taxon becomes the consensus.
                    trunk = taxonomy.ancestors(taxon, true).collect();
                } else {
                    // Meets the trunk further up; the junction is the new
                    // consensus.
                    trunk.drain(..i);
                }
                met = true;
                break;
            }
        }

        if !met {
            // No common ancestor exists.
            return (None, taxa.iter().copied().collect());
        }
    }

    let others = taxa
        .iter()
        .copied()
        .filter(|t| !trunk.contains(t))
        .collect();
    (trunk.first().copied(), others)
}

/// Match between a query and a single reference genome.
///
/// `genome` is an index into the reference genome list. `matched_taxon` is
/// the prediction based on this match alone: the genome's taxon or one of
/// its ancestors, or `None` when no threshold was satisfied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenomeMatch {
    pub genome: usize,
    pub distance: f32,
    pub matched_taxon: Option<TaxonId>,
}

impl GenomeMatch {
    pub fn new(
        taxonomy: &Taxonomy,
        genomes: &[AnnotatedGenome],
        genome: usize,
        distance: f32,
    ) -> GenomeMatch {
        GenomeMatch {
            genome,
            distance,
            matched_taxon: matching_taxon(taxonomy, genomes[genome].taxon, distance),
        }
    }
}

/// Result of applying the classifier to a single query genome.
///
/// `success = true` with `predicted_taxon = None` means the process ran
/// cleanly but no prediction could be made. A populated `error` (with
/// `success = false`) records a strict-mode reconciliation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierResult {
    pub success: bool,
    pub predicted_taxon: Option<TaxonId>,
    /// Match to the closest genome whose matched taxon is equal to or a
    /// descendant of `predicted_taxon`. `None` when no prediction was made.
    pub primary_match: Option<GenomeMatch>,
    /// Match to the closest reference genome overall.
    pub closest_match: GenomeMatch,
    /// Next most specific taxon whose threshold was not met, taken from the
    /// closest genome's ancestry.
    pub next_taxon: Option<TaxonId>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// Predict the taxonomy of a query genome from its distances to a set of
/// reference genomes.
///
/// Fails fast on malformed input (empty genome list, length mismatch,
/// negative or all-NaN distances). Classification inconsistencies never
/// raise; they are encoded in the returned result.
pub fn classify(
    taxonomy: &Taxonomy,
    genomes: &[AnnotatedGenome],
    dists: &[f32],
    strict: bool,
) -> Result<ClassifierResult> {
    if genomes.is_empty() {
        return Err(GambitError::InvalidInput(
            "reference genome list is empty".into(),
        ));
    }
    if genomes.len() != dists.len() {
        return Err(GambitError::InvalidInput(format!(
            "got {} distances for {} reference genomes",
            dists.len(),
            genomes.len()
        )));
    }
    validate_dists(dists)?;

    let closest = argmin(dists);
    let closest_match = GenomeMatch::new(taxonomy, genomes, closest, dists[closest]);
    let next = next_taxon(taxonomy, genomes[closest].taxon, dists[closest]);

    if !strict {
        return Ok(ClassifierResult {
            success: true,
            predicted_taxon: closest_match.matched_taxon,
            primary_match: closest_match.matched_taxon.map(|_| closest_match),
            closest_match,
            next_taxon: next,
            warnings: Vec::new(),
            error: None,
        });
    }

    // Find all matches and attempt to reconcile them.
    let matches = find_matches(taxonomy, genomes, dists);
    let matched_taxa: Vec<TaxonId> = matches.iter().map(|(t, _)| *t).collect();
    let (consensus, others) = consensus_taxon(taxonomy, &matched_taxa);

    if matches.is_empty() {
        return Ok(ClassifierResult {
            success: true,
            predicted_taxon: None,
            primary_match: None,
            closest_match,
            next_taxon: next,
            warnings: Vec::new(),
            error: None,
        });
    }

    let primary_match = consensus.and_then(|consensus| {
        let mut best: Option<GenomeMatch> = None;
        for (taxon, idxs) in &matches {
            // Only matches at or below the consensus can be primary.
            if !taxonomy.is_ancestor_or_self(consensus, *taxon) {
                continue;
            }
            for &i in idxs {
                if best.is_none_or(|b| dists[i] < b.distance) {
                    best = Some(GenomeMatch {
                        genome: i,
                        distance: dists[i],
                        matched_taxon: Some(*taxon),
                    });
                }
            }
        }
        best
    });

    let mut warnings = Vec::new();
    if !others.is_empty() {
        let names = others
            .iter()
            .map(|&t| taxonomy.short_repr(t))
            .sorted()
            .join(", ");
        warnings.push(format!(
            "Query matched {} inconsistent taxa: {names}. \
             Reporting lowest common ancestor of this set.",
            others.len()
        ));
    }

    let mut result = ClassifierResult {
        success: true,
        predicted_taxon: consensus,
        primary_match,
        closest_match,
        next_taxon: next,
        warnings,
        error: None,
    };

    if consensus.is_none() {
        result.success = false;
        result.error = Some("Matched taxa have no common ancestor.".into());
    }

    if let Some(primary) = result.primary_match {
        if primary.genome != result.closest_match.genome {
            result
                .warnings
                .push("Primary genome match is not closest match.".into());
        }
    }

    Ok(result)
}

/// Index of the smallest value, ignoring NaNs (at least one value must be
/// non-NaN, enforced by input validation).
fn argmin(dists: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_val = f32::INFINITY;
    for (i, &d) in dists.iter().enumerate() {
        if d < best_val {
            best = i;
            best_val = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::test_fixtures::{build_taxonomy, genome};
    use crate::db::models::Taxonomy;

    /// Three genomes assigned to t1 < t2 < t3 with thresholds 0.2/0.4/0.6.
    fn linear_fixture() -> (Taxonomy, Vec<AnnotatedGenome>) {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let genomes = vec![
            genome("g0", 10, t1),
            genome("g1", 11, t1),
            genome("g2", 12, t1),
        ];
        (tax, genomes)
    }

    #[test]
    fn test_matching_taxon_walks_up() {
        let tax = build_taxonomy();
        let t0 = tax.taxon_by_key("t0").expect("t0");
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t2 = tax.taxon_by_key("t2").expect("t2");
        let t3 = tax.taxon_by_key("t3").expect("t3");

        // t0 has no threshold; the walk starts there and defers upward.
        assert_eq!(matching_taxon(&tax, t0, 0.1), Some(t1));
        assert_eq!(matching_taxon(&tax, t0, 0.3), Some(t2));
        assert_eq!(matching_taxon(&tax, t0, 0.5), Some(t3));
        assert_eq!(matching_taxon(&tax, t0, 0.7), None);
        // Boundary is inclusive.
        assert_eq!(matching_taxon(&tax, t0, 0.2), Some(t1));
    }

    #[test]
    fn test_next_taxon() {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t2 = tax.taxon_by_key("t2").expect("t2");
        let t3 = tax.taxon_by_key("t3").expect("t3");

        // Threshold met at the leaf: nothing was missed.
        assert_eq!(next_taxon(&tax, t1, 0.15), None);
        // Missed t1, met t2.
        assert_eq!(next_taxon(&tax, t1, 0.3), Some(t1));
        // Missed t1 and t2, met t3.
        assert_eq!(next_taxon(&tax, t1, 0.5), Some(t2));
        // Missed everything.
        assert_eq!(next_taxon(&tax, t1, 0.9), Some(t3));
    }

    #[test]
    fn test_consensus_singleton_and_lineage() {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t2 = tax.taxon_by_key("t2").expect("t2");
        let t3 = tax.taxon_by_key("t3").expect("t3");

        let (c, others) = consensus_taxon(&tax, &[t1]);
        assert_eq!(c, Some(t1));
        assert!(others.is_empty());

        // All in a single lineage: most specific wins, regardless of order.
        for perm in [[t3, t2, t1], [t1, t2, t3], [t2, t1, t3]] {
            let (c, others) = consensus_taxon(&tax, &perm);
            assert_eq!(c, Some(t1));
            assert!(others.is_empty());
        }

        let (c, others) = consensus_taxon(&tax, &[]);
        assert_eq!(c, None);
        assert!(others.is_empty());
    }

    #[test]
    fn test_consensus_divergent_lineages() {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t2 = tax.taxon_by_key("t2").expect("t2");
        let t4 = tax.taxon_by_key("t4").expect("t4");

        // t1 and t4 are siblings under t2.
        let (c, others) = consensus_taxon(&tax, &[t1, t4]);
        assert_eq!(c, Some(t2));
        assert_eq!(others.len(), 2);
        assert!(others.contains(&t1) && others.contains(&t4));
    }

    #[test]
    fn test_consensus_disjoint_trees() {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t5 = tax.taxon_by_key("t5").expect("t5");
        let (c, others) = consensus_taxon(&tax, &[t1, t5]);
        assert_eq!(c, None);
        assert_eq!(others.len(), 2);
    }

    #[test]
    fn test_classify_nonstrict_hit() {
        let (tax, genomes) = linear_fixture();
        let t1 = tax.taxon_by_key("t1").expect("t1");

        let result = classify(&tax, &genomes, &[0.15, 0.5, 0.7], false).expect("classify");
        assert!(result.success);
        assert_eq!(result.predicted_taxon, Some(t1));
        assert_eq!(result.closest_match.genome, 0);
        assert_eq!(result.primary_match, Some(result.closest_match));
        assert_eq!(result.next_taxon, None);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_classify_nonstrict_miss() {
        let (tax, genomes) = linear_fixture();
        let t3 = tax.taxon_by_key("t3").expect("t3");

        let result = classify(&tax, &genomes, &[0.9, 0.95, 0.99], false).expect("classify");
        assert!(result.success);
        assert_eq!(result.predicted_taxon, None);
        assert_eq!(result.primary_match, None);
        assert_eq!(result.closest_match.genome, 0);
        // The tightest threshold still unmet along the lineage.
        assert_eq!(result.next_taxon, Some(t3));
    }

    #[test]
    fn test_classify_nonstrict_deterministic() {
        let (tax, genomes) = linear_fixture();
        let dists = [0.35f32, 0.3, 0.8];
        let a = classify(&tax, &genomes, &dists, false).expect("classify");
        let b = classify(&tax, &genomes, &dists, false).expect("classify");
        assert_eq!(a, b);
        assert_eq!(a.closest_match.genome, 1);
    }

    #[test]
    fn test_classify_strict_consensus_warning() {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t2 = tax.taxon_by_key("t2").expect("t2");
        let t4 = tax.taxon_by_key("t4").expect("t4");
        let genomes = vec![genome("a", 20, t1), genome("b", 21, t4)];

        // Both genomes within their species thresholds, species disagree.
        let result = classify(&tax, &genomes, &[0.1, 0.15], true).expect("classify");
        assert!(result.success);
        assert_eq!(result.predicted_taxon, Some(t2));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("2 inconsistent taxa"));
        assert!(result.warnings[0].contains("1:t1"));
        assert!(result.warnings[0].contains("4:t4"));
        // Primary match is the closest genome below the consensus.
        let primary = result.primary_match.expect("primary match");
        assert_eq!(primary.genome, 0);
    }

    #[test]
    fn test_classify_strict_no_common_ancestor() {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t5 = tax.taxon_by_key("t5").expect("t5");
        let genomes = vec![genome("a", 30, t1), genome("b", 31, t5)];

        let result = classify(&tax, &genomes, &[0.1, 0.1], true).expect("classify");
        assert!(!result.success);
        assert_eq!(result.predicted_taxon, None);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_classify_strict_refines_nonstrict() {
        let tax = build_taxonomy();
        let t1 = tax.taxon_by_key("t1").expect("t1");
        let t4 = tax.taxon_by_key("t4").expect("t4");
        let genomes = vec![genome("a", 40, t1), genome("b", 41, t4)];

        for dists in [[0.1f32, 0.15], [0.1, 0.9], [0.35, 0.38]] {
            let loose = classify(&tax, &genomes, &dists, false).expect("classify");
            let strict = classify(&tax, &genomes, &dists, true).expect("classify");
            if !strict.success {
                continue;
            }
            match (loose.predicted_taxon, strict.predicted_taxon) {
                (Some(l), Some(s)) => assert!(tax.is_ancestor_or_self(s, l)),
                (None, s) => assert_eq!(s, None),
                (Some(_), None) => panic!("strict dropped a prediction"),
            }
        }
    }

    #[test]
    fn test_classify_strict_single_match_equals_nonstrict() {
        let (tax, genomes) = linear_fixture();
        let dists = [0.1f32, 0.9, 0.9];
        let loose = classify(&tax, &genomes, &dists, false).expect("classify");
        let strict = classify(&tax, &genomes, &dists, true).expect("classify");
        assert_eq!(strict.predicted_taxon, loose.predicted_taxon);
        assert!(strict.warnings.is_empty());
        assert!(strict.success);
    }

    #[test]
    fn test_classify_invalid_input() {
        let (tax, genomes) = linear_fixture();
        assert!(classify(&tax, &[], &[], false).is_err());
        assert!(classify(&tax, &genomes, &[0.1], false).is_err());
        assert!(classify(&tax, &genomes, &[0.1, -0.2, 0.3], false).is_err());
        assert!(classify(
            &tax,
            &genomes,
            &[f32::NAN, f32::NAN, f32::NAN],
            false
        )
        .is_err());
    }
}
