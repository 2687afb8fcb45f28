//! Combining detections from the independent passes.

use indexmap::map::Entry;
use indexmap::IndexMap;
use jsreveal_core::{CryptoAlgorithm, CryptoParameters};

fn merge_key(name: &str) -> String {
    name.to_ascii_uppercase()
}

fn absorb(target: &mut Option<CryptoParameters>, extra: Option<CryptoParameters>) {
    if let Some(extra) = extra {
        target.get_or_insert_with(CryptoParameters::default).fill_missing(&extra);
    }
}

/// One entry per algorithm name (case-insensitive), keeping the most confident detection.
/// Parameters carried by the dropped duplicates fill gaps in the kept one. First-seen order is
/// preserved.
pub fn merge_results(algorithms: Vec<CryptoAlgorithm>) -> Vec<CryptoAlgorithm> {
    let mut merged: IndexMap<String, CryptoAlgorithm> = IndexMap::new();
    for algorithm in algorithms {
        match merged.entry(merge_key(&algorithm.name)) {
            Entry::Vacant(slot) => {
                slot.insert(algorithm);
            }
            Entry::Occupied(mut slot) => {
                let kept = slot.get_mut();
                if algorithm.confidence > kept.confidence {
                    let previous = kept.parameters.take();
                    *kept = algorithm;
                    absorb(&mut kept.parameters, previous);
                } else {
                    absorb(&mut kept.parameters, algorithm.parameters);
                }
            }
        }
    }
    merged.into_values().collect()
}

/// Attaches the parameters recovered for each algorithm name. Algorithms with no entry in
/// `parameters` end up with none.
pub fn merge_parameters(
    algorithms: Vec<CryptoAlgorithm>,
    parameters: &IndexMap<String, CryptoParameters>,
) -> Vec<CryptoAlgorithm> {
    algorithms
        .into_iter()
        .map(|mut algorithm| {
            algorithm.parameters = parameters
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&algorithm.name))
                .map(|(_, params)| params.clone());
            algorithm
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsreveal_core::{CodeLocation, CryptoType};
    use pretty_assertions::assert_eq;

    fn algorithm(name: &str, confidence: f64) -> CryptoAlgorithm {
        CryptoAlgorithm::new(
            name,
            CryptoType::Symmetric,
            confidence,
            "test",
            CodeLocation::default(),
        )
    }

    #[test]
    fn test_higher_confidence_wins() {
        let merged = merge_results(vec![algorithm("AES", 0.5), algorithm("AES", 0.9)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 0.9);

        let merged = merge_results(vec![algorithm("AES", 0.9), algorithm("aes", 0.5)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "AES");
    }

    #[test]
    fn test_order_and_distinct_names_kept() {
        let merged = merge_results(vec![
            algorithm("MD5", 0.4),
            algorithm("AES", 0.9),
            algorithm("MD5", 0.6),
        ]);
        let names: Vec<&str> = merged.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["MD5", "AES"]);
        assert_eq!(merged[0].confidence, 0.6);
    }

    #[test]
    fn test_parameters_survive_a_more_confident_duplicate() {
        let mut weak = algorithm("AES", 0.4);
        weak.parameters = Some(CryptoParameters {
            mode: Some("ECB".to_string()),
            ..Default::default()
        });
        let merged = merge_results(vec![weak, algorithm("AES", 0.9)]);
        assert_eq!(merged[0].confidence, 0.9);
        assert_eq!(
            merged[0].parameters.as_ref().and_then(|p| p.mode.as_deref()),
            Some("ECB")
        );
    }

    #[test]
    fn test_merge_parameters_by_name() {
        let mut parameters = IndexMap::new();
        parameters.insert(
            "AES".to_string(),
            CryptoParameters {
                key_size: Some(128),
                ..Default::default()
            },
        );
        let mut stale = algorithm("MD5", 0.5);
        stale.parameters = Some(CryptoParameters::default());
        let merged = merge_parameters(vec![algorithm("AES", 0.9), stale], &parameters);
        assert_eq!(merged[0].parameters.as_ref().and_then(|p| p.key_size), Some(128));
        assert_eq!(merged[1].parameters, None);
    }
}
