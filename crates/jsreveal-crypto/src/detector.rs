//! The crypto detection pipeline: syntax-tree and keyword passes, optional AI pass, merge,
//! security evaluation, strength scoring, cache.

use crate::ai::detect_with_ai;
use crate::ast_detector::{detect_by_ast, AstDetection};
use crate::keywords::{detect_libraries, KeywordMatcher};
use crate::merge::{merge_parameters, merge_results};
use crate::rules::CryptoRules;
use crate::security::evaluate_security;
use crate::strength::analyze_strength;
use jsreveal_core::{
    CacheKey, CompletionProvider, CryptoDetectionResult, CryptoOptions, ResultCache,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CACHE_SCOPE: &str = "crypto";
const INLINE_FILE: &str = "inline";

pub struct CryptoDetector {
    rules: CryptoRules,
    keywords: KeywordMatcher,
    cache: ResultCache<CryptoDetectionResult>,
    provider: Option<Arc<dyn CompletionProvider>>,
}

impl Default for CryptoDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoDetector {
    pub fn new() -> Self {
        Self::with_rules(CryptoRules::default())
    }

    pub fn with_rules(rules: CryptoRules) -> Self {
        Self {
            keywords: KeywordMatcher::new(&rules),
            rules,
            cache: ResultCache::default(),
            provider: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.cache = ResultCache::new(capacity);
        self
    }

    pub fn with_provider(mut self, provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        self.provider = provider;
        self
    }

    pub fn rules(&self) -> &CryptoRules {
        &self.rules
    }

    pub fn cache(&self) -> &ResultCache<CryptoDetectionResult> {
        &self.cache
    }

    pub fn detect(&mut self, code: &str, options: &CryptoOptions) -> Arc<CryptoDetectionResult> {
        self.detect_in(INLINE_FILE, code, options)
    }

    /// Detects crypto usage in `code`, reporting locations against `file`. Never fails: a pass
    /// that cannot run leaves a warning on the result instead.
    pub fn detect_in(
        &mut self,
        file: &str,
        code: &str,
        options: &CryptoOptions,
    ) -> Arc<CryptoDetectionResult> {
        let fingerprint = format!("{};file={}", options.cache_fingerprint(), file);
        let key = CacheKey::from_parts(CACHE_SCOPE, code, &fingerprint);
        if let Some(cached) = self.cache.get(&key) {
            debug!(
                file,
                hits = self.cache.statistics().hits,
                hit_rate = self.cache.hit_rate(),
                "crypto detection cache hit"
            );
            return cached;
        }

        let mut warnings = Vec::new();
        let AstDetection {
            algorithms: ast_algorithms,
            mut parameters,
        } = match detect_by_ast(code, file, &self.rules) {
            Ok(found) => found,
            Err(err) => {
                warn!(file, error = %err, "syntax tree crypto pass skipped");
                warnings.push(format!("AST analysis skipped: {}", err));
                AstDetection::default()
            }
        };

        let mut algorithms = ast_algorithms;
        algorithms.extend(self.keywords.scan(code, file, &self.rules));

        if options.use_ai {
            match &self.provider {
                Some(provider) => match detect_with_ai(provider.as_ref(), code, file) {
                    Ok(found) => {
                        for algorithm in &found {
                            if let Some(params) = &algorithm.parameters {
                                parameters
                                    .entry(algorithm.name.clone())
                                    .or_default()
                                    .fill_missing(params);
                            }
                        }
                        algorithms.extend(found);
                    }
                    Err(err) => {
                        warn!(provider = provider.name(), error = %err, "AI crypto detection failed");
                        warnings.push(format!("AI detection unavailable: {}", err));
                    }
                },
                None => warnings
                    .push("AI detection unavailable: no completion provider configured".to_string()),
            }
        }

        let algorithms = merge_parameters(merge_results(algorithms), &parameters);
        let libraries = detect_libraries(code, &self.rules);
        let security = evaluate_security(&algorithms, code, &self.rules);
        let strength = analyze_strength(&algorithms, &security);

        info!(
            file,
            algorithms = algorithms.len(),
            libraries = libraries.len(),
            issues = security.len(),
            strength = %strength.overall,
            "crypto detection finished"
        );
        let result = CryptoDetectionResult {
            algorithms,
            libraries,
            security,
            strength,
            warnings,
        };
        self.cache.insert(key, result)
    }
}
