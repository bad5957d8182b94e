//! Compiled forms and the per-version form cache.
//!
//! A [`CompiledForm`] is built once per form version: every rule expression
//! is parsed, every pattern regex compiled and the derivation graph
//! resolved. It is immutable afterwards and shared across validation calls
//! through an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use edc_core::{
    CrossFieldRule, DerivationGraph, DisplayCondition, Expression, ExpressionError,
    FieldMetadata, FormMetadata, ValidationSpec,
};
use regex::Regex;

use crate::config::EngineConfig;

/// One form version, prepared for evaluation.
#[derive(Debug)]
pub struct CompiledForm {
    metadata: FormMetadata,
    config: EngineConfig,
    expressions: HashMap<String, Result<Arc<Expression>, ExpressionError>>,
    patterns: HashMap<String, Regex>,
    graph: DerivationGraph,
    cross_field_rules: Vec<CrossFieldRule>,
}

/// Where an expression appears, for diagnostics.
struct Site<'a> {
    field: &'a str,
    rule: &'a str,
    source: &'a str,
}

impl CompiledForm {
    pub fn compile(form: &FormMetadata, config: &EngineConfig) -> CompiledForm {
        let _span = tracing::debug_span!(
            "compile_form",
            form = %form.form_id,
            version = %form.version
        )
        .entered();

        let cross_field_rules = form.cross_field_rules();
        let mut sites = Vec::new();
        for field in &form.fields {
            collect_field_sites(field, &mut sites);
        }
        for rule in &cross_field_rules {
            let owner = rule
                .related_field_ids
                .first()
                .map_or("", String::as_str);
            sites.push(Site {
                field: owner,
                rule: &rule.id,
                source: &rule.expression,
            });
        }

        let mut expressions: HashMap<String, Result<Arc<Expression>, ExpressionError>> =
            HashMap::new();
        for site in &sites {
            if expressions.contains_key(site.source) {
                continue;
            }
            let parsed = Expression::parse_with_limits(site.source, &config.limits);
            if let Err(e) = &parsed {
                tracing::warn!(
                    form = %form.form_id,
                    field = site.field,
                    rule = site.rule,
                    error = %e,
                    "rule expression is invalid; the rule will be skipped"
                );
            }
            expressions.insert(site.source.to_owned(), parsed.map(Arc::new));
        }

        let mut patterns: HashMap<String, Regex> = HashMap::new();
        for field in &form.fields {
            for spec in validation_specs(field) {
                let Some(pattern) = &spec.pattern else {
                    continue;
                };
                if patterns.contains_key(pattern) {
                    continue;
                }
                match Regex::new(pattern) {
                    Ok(re) => {
                        patterns.insert(pattern.clone(), re);
                    }
                    Err(e) => tracing::warn!(
                        form = %form.form_id,
                        field = %field.id,
                        error = %e,
                        "pattern does not compile; the pattern check will be skipped"
                    ),
                }
            }
        }

        let graph = DerivationGraph::build(&form.fields);
        for cycle in graph.cycles() {
            tracing::warn!(form = %form.form_id, fields = ?cycle.fields, "{}", cycle);
        }

        tracing::debug!(
            expressions = expressions.len(),
            patterns = patterns.len(),
            derived = graph.nodes().len(),
            "form compiled"
        );

        CompiledForm {
            metadata: form.clone(),
            config: config.clone(),
            expressions,
            patterns,
            graph,
            cross_field_rules,
        }
    }

    pub fn metadata(&self) -> &FormMetadata {
        &self.metadata
    }

    pub fn form_id(&self) -> &str {
        &self.metadata.form_id
    }

    pub fn fields(&self) -> &[FieldMetadata] {
        &self.metadata.fields
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldMetadata> {
        self.metadata.field(field_id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The parsed form of `source`, or the error it failed with.
    ///
    /// Text that was not seen at compile time is parsed on demand.
    pub fn expression(&self, source: &str) -> Result<Arc<Expression>, ExpressionError> {
        match self.expressions.get(source) {
            Some(parsed) => parsed.clone(),
            None => Expression::parse_with_limits(source, &self.config.limits).map(Arc::new),
        }
    }

    /// The compiled regex for `pattern`, or `None` when it does not compile.
    pub fn pattern(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    pub fn graph(&self) -> &DerivationGraph {
        &self.graph
    }

    /// Cross-field and consistency rules, deduplicated by rule id.
    pub fn cross_field_rules(&self) -> &[CrossFieldRule] {
        &self.cross_field_rules
    }

    /// Number of expressions that failed to parse.
    pub fn broken_expressions(&self) -> usize {
        self.expressions.values().filter(|e| e.is_err()).count()
    }
}

fn validation_specs(field: &FieldMetadata) -> impl Iterator<Item = &ValidationSpec> {
    std::iter::once(&field.validation)
        .chain(field.validation.conditional_rules.iter().map(|c| &c.rules))
}

fn collect_field_sites<'a>(field: &'a FieldMetadata, sites: &mut Vec<Site<'a>>) {
    let id = field.id.as_str();
    for spec in validation_specs(field) {
        for rule in &spec.custom_rules {
            sites.push(Site {
                field: id,
                rule: &rule.id,
                source: &rule.expression,
            });
        }
    }
    for cond in &field.validation.conditional_rules {
        sites.push(Site {
            field: id,
            rule: "conditional",
            source: &cond.condition,
        });
    }
    if let Some(DisplayCondition::Expression { expression }) = &field.display.conditional_display {
        sites.push(Site {
            field: id,
            rule: "conditional_display",
            source: expression,
        });
    }
    if let Some(derivation) = &field.derivation {
        sites.push(Site {
            field: id,
            rule: "derivation",
            source: &derivation.formula,
        });
    }
    for rule in &field.query.auto_query_rules {
        sites.push(Site {
            field: id,
            rule: &rule.id,
            source: &rule.condition,
        });
    }
}

// ──────────────────────────────────────────────
// Cache
// ──────────────────────────────────────────────

type FormKey = (String, String);

/// Compiled forms keyed by `(formId, version)`.
///
/// Versions are immutable once published, so an entry is built once and
/// only ever read afterwards.
#[derive(Debug, Default)]
pub struct FormCache {
    forms: RwLock<HashMap<FormKey, Arc<CompiledForm>>>,
}

impl FormCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, form_id: &str, version: &str) -> Option<Arc<CompiledForm>> {
        let forms = self.forms.read().unwrap_or_else(PoisonError::into_inner);
        forms
            .get(&(form_id.to_owned(), version.to_owned()))
            .cloned()
    }

    /// The cached compiled form for this version, compiling it on first use.
    pub fn get_or_compile(&self, form: &FormMetadata, config: &EngineConfig) -> Arc<CompiledForm> {
        if let Some(hit) = self.get(&form.form_id, &form.version) {
            return hit;
        }
        let compiled = Arc::new(CompiledForm::compile(form, config));
        let mut forms = self.forms.write().unwrap_or_else(PoisonError::into_inner);
        forms
            .entry((form.form_id.clone(), form.version.clone()))
            .or_insert(compiled)
            .clone()
    }

    pub fn invalidate(&self, form_id: &str, version: &str) -> bool {
        let mut forms = self.forms.write().unwrap_or_else(PoisonError::into_inner);
        forms
            .remove(&(form_id.to_owned(), version.to_owned()))
            .is_some()
    }

    pub fn clear(&self) {
        self.forms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.forms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(version: &str) -> FormMetadata {
        serde_json::from_value(json!({
            "formId": "VS",
            "version": version,
            "fields": [
                {
                    "id": "SYSBP",
                    "type": "number",
                    "validation": {
                        "pattern": "^[0-9]+$",
                        "customRules": [
                            {"id": "R1", "expression": "value < 300", "message": "too high"},
                            {"id": "R2", "expression": "value >", "message": "broken"}
                        ]
                    }
                },
                {
                    "id": "CODE",
                    "type": "text",
                    "validation": {"pattern": "([a-z"}
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn expressions_are_parsed_once_and_errors_kept() {
        let compiled = CompiledForm::compile(&form("1"), &EngineConfig::new());
        assert!(compiled.expression("value < 300").is_ok());
        assert_eq!(compiled.expression("value >").unwrap_err().kind(), "parse");
        assert_eq!(compiled.broken_expressions(), 1);
    }

    #[test]
    fn invalid_patterns_are_dropped() {
        let compiled = CompiledForm::compile(&form("1"), &EngineConfig::new());
        assert!(compiled.pattern("^[0-9]+$").is_some());
        assert!(compiled.pattern("([a-z").is_none());
    }

    #[test]
    fn parse_limits_come_from_config() {
        let mut config = EngineConfig::new();
        config.limits.max_expression_len = 5;
        let compiled = CompiledForm::compile(&form("1"), &config);
        assert!(compiled.expression("value < 300").is_err());
    }

    #[test]
    fn cache_keys_by_form_and_version() {
        let cache = FormCache::new();
        let config = EngineConfig::new();
        let a = cache.get_or_compile(&form("1"), &config);
        let b = cache.get_or_compile(&form("1"), &config);
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get_or_compile(&form("2"), &config);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
        assert!(cache.invalidate("VS", "1"));
        assert!(cache.get("VS", "1").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_is_shared_across_threads() {
        let cache = Arc::new(FormCache::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_or_compile(&form("1"), &EngineConfig::new()))
            })
            .collect();
        let compiled: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(compiled.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }
}
