//! Form metadata model.
//!
//! Metadata arrives already parsed from the form-definition service and is
//! immutable at entry time. Field types are a closed tagged enum so every
//! consumer handles each kind explicitly. JSON names follow the camelCase
//! convention of the form designer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Form
// ──────────────────────────────────────────────

/// One version of a form definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormMetadata {
    pub form_id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub fields: Vec<FieldMetadata>,
}

fn default_version() -> String {
    "1".to_owned()
}

impl FormMetadata {
    pub fn field(&self, field_id: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    /// All cross-field rules of the form, in field declaration order.
    ///
    /// Consistency rules are included as error-severity cross-field rules over
    /// their owning field plus their related fields. A rule id declared on
    /// several fields is returned once, at its first declaration.
    pub fn cross_field_rules(&self) -> Vec<CrossFieldRule> {
        let mut seen = std::collections::BTreeSet::new();
        let mut rules = Vec::new();
        for field in &self.fields {
            for rule in &field.data_quality.cross_field_validation {
                if seen.insert(rule.id.clone()) {
                    rules.push(rule.clone());
                }
            }
            for rule in &field.data_quality.consistency_rules {
                if seen.insert(rule.id.clone()) {
                    rules.push(rule.as_cross_field_rule(&field.id));
                }
            }
        }
        rules
    }
}

// ──────────────────────────────────────────────
// Field
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub validation: ValidationSpec,
    #[serde(default)]
    pub display: DisplaySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<DerivationSpec>,
    #[serde(default)]
    pub clinical: ClinicalFlags,
    #[serde(default)]
    pub data_quality: DataQualitySpec,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub data_entry: DataEntrySpec,
}

impl FieldMetadata {
    /// Label for user-facing messages, falling back to the field id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    pub fn is_derived(&self) -> bool {
        self.derivation.is_some()
    }
}

/// The closed set of field types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Textarea,
    Number,
    Date,
    Datetime,
    Time,
    Email,
    Phone,
    Url,
    Select {
        #[serde(default)]
        options: Vec<FieldOption>,
    },
    Radio {
        #[serde(default)]
        options: Vec<FieldOption>,
    },
    Multiselect {
        #[serde(default)]
        options: Vec<FieldOption>,
    },
    Checkbox,
    CheckboxGroup {
        #[serde(default)]
        options: Vec<FieldOption>,
    },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Number => "number",
            FieldKind::Date => "date",
            FieldKind::Datetime => "datetime",
            FieldKind::Time => "time",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Url => "url",
            FieldKind::Select { .. } => "select",
            FieldKind::Radio { .. } => "radio",
            FieldKind::Multiselect { .. } => "multiselect",
            FieldKind::Checkbox => "checkbox",
            FieldKind::CheckboxGroup { .. } => "checkbox_group",
        }
    }

    /// Statically declared options for choice fields. Empty when the options
    /// are supplied at run time by the option-loading service.
    pub fn options(&self) -> &[FieldOption] {
        match self {
            FieldKind::Select { options }
            | FieldKind::Radio { options }
            | FieldKind::Multiselect { options }
            | FieldKind::CheckboxGroup { options } => options,
            _ => &[],
        }
    }

    /// Kinds whose value is a list of selections.
    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self,
            FieldKind::Multiselect { .. } | FieldKind::CheckboxGroup { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOption {
    pub value: String,
    #[serde(default)]
    pub label: String,
}

// ──────────────────────────────────────────────
// Validation
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Decimal,
    Date,
    Datetime,
    Time,
    Email,
    Phone,
    Url,
}

/// Per-field structural rules. Also used, partially filled, as the nested
/// rule set of a [`ConditionalRule`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationSpec {
    pub required: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_negative: Option<bool>,
    /// Earliest accepted date, `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_date: Option<String>,
    /// Latest accepted date, `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_date: Option<String>,
    /// Dates after the reference date are errors unless this is `true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_future_dates: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_rules: Vec<CustomRule>,
    #[serde(alias = "conditionalValidation", skip_serializing_if = "Vec::is_empty")]
    pub conditional_rules: Vec<ConditionalRule>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// A pure predicate over the value context. `false` emits `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRule {
    #[serde(alias = "ruleId")]
    pub id: String,
    pub expression: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(alias = "errorMessage")]
    pub message: String,
}

/// Applies `rules` only while `condition` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalRule {
    pub condition: String,
    #[serde(alias = "rulesToApply")]
    pub rules: ValidationSpec,
}

// ──────────────────────────────────────────────
// Display
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplaySpec {
    pub hidden: bool,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_display: Option<DisplayCondition>,
}

/// When a field is shown. Either a rule expression or the designer's
/// structured single-field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayCondition {
    Expression {
        expression: String,
    },
    Comparison {
        field: String,
        operator: DisplayOperator,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
}

// ──────────────────────────────────────────────
// Derivation
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationSpec {
    #[serde(alias = "derivationFormula")]
    pub formula: String,
    #[serde(default, alias = "derivationDependencies", alias = "dependencyFieldIds")]
    pub dependencies: Vec<String>,
}

// ──────────────────────────────────────────────
// Classification flags
// ──────────────────────────────────────────────

/// Regulatory classification. Annotates results, never changes control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClinicalFlags {
    pub critical_data_point: bool,
    pub safety_data_point: bool,
    pub medical_review_required: bool,
    pub data_review_required: bool,
    pub sdv_required: bool,
}

impl ClinicalFlags {
    pub fn requires_review(&self) -> bool {
        self.medical_review_required || self.data_review_required || self.sdv_required
    }
}

// ──────────────────────────────────────────────
// Data quality
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataQualitySpec {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub range_checks: Vec<RangeCheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consistency_rules: Vec<ConsistencyRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cross_field_validation: Vec<CrossFieldRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_check: Option<DuplicateCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    Normal,
    Expected,
    Possible,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeAction {
    Warning,
    Error,
    Query,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeCheck {
    pub check_id: String,
    #[serde(rename = "type")]
    pub kind: RangeKind,
    #[serde(default)]
    pub min: Option<Decimal>,
    #[serde(default)]
    pub max: Option<Decimal>,
    pub action: RangeAction,
    #[serde(default)]
    pub message: Option<String>,
}

impl RangeCheck {
    /// True when `n` lies outside the declared bounds.
    pub fn is_violated_by(&self, n: Decimal) -> bool {
        self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max)
    }
}

/// A rule spanning several fields; a `false` result is reported on every
/// field in `related_field_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossFieldRule {
    #[serde(alias = "ruleId")]
    pub id: String,
    #[serde(alias = "relatedFields")]
    pub related_field_ids: Vec<String>,
    pub expression: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyKind {
    Temporal,
    Logical,
    Anatomical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyRule {
    #[serde(alias = "ruleId")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConsistencyKind,
    #[serde(default)]
    pub related_fields: Vec<String>,
    pub expression: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ConsistencyRule {
    pub fn as_cross_field_rule(&self, owner: &str) -> CrossFieldRule {
        let mut related = vec![owner.to_owned()];
        related.extend(
            self.related_fields
                .iter()
                .filter(|f| f.as_str() != owner)
                .cloned(),
        );
        CrossFieldRule {
            id: self.id.clone(),
            related_field_ids: related,
            expression: self.expression.clone(),
            message: self.message.clone(),
            severity: Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateScope {
    #[default]
    Form,
    Visit,
    Subject,
    Study,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheck {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub scope: DuplicateScope,
    #[serde(default)]
    pub fields: Vec<String>,
}

// ──────────────────────────────────────────────
// Queries
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPriority {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoQueryRule {
    #[serde(alias = "ruleId")]
    pub id: String,
    pub condition: String,
    pub query_text: String,
    #[serde(default = "default_query_priority")]
    pub priority: QueryPriority,
}

fn default_query_priority() -> QueryPriority {
    QueryPriority::Medium
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryConfig {
    pub auto_query_enabled: bool,
    /// Minimum priority a rule must carry to be raised.
    pub query_threshold: QueryPriority,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub auto_query_rules: Vec<AutoQueryRule>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            auto_query_enabled: true,
            query_threshold: QueryPriority::Low,
            auto_query_rules: Vec::new(),
        }
    }
}

// ──────────────────────────────────────────────
// Data entry
// ──────────────────────────────────────────────

/// Special responses accepted in place of a real value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataEntrySpec {
    #[serde(rename = "allowNA")]
    pub allow_na: bool,
    pub allow_not_done: bool,
    pub allow_unknown: bool,
}
