use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractStatus {
    Draft,
    InReview,
    Approved,
    Rejected,
}

impl ContractStatus {
    pub const ALL: [ContractStatus; 4] = [Self::Draft, Self::InReview, Self::Approved, Self::Rejected];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InReview => "in-review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleEvent {
    Submit,
    Approve,
    Reject,
    Revise,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Revise => "revise",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricCategory {
    Revenue,
    Engagement,
    Risk,
}

impl MetricCategory {
    pub const ALL: [MetricCategory; 3] = [Self::Revenue, Self::Engagement, Self::Risk];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Revenue => "Revenue",
            Self::Engagement => "Engagement",
            Self::Risk => "Risk",
        }
    }

    /// Case-insensitive match on the variant name.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl Default for MetricCategory {
    fn default() -> Self {
        Self::Revenue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    Count,
    Sum,
    Ratio,
    Derived,
    Windowed,
}

impl MetricType {
    pub const ALL: [MetricType; 5] = [Self::Count, Self::Sum, Self::Ratio, Self::Derived, Self::Windowed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "Count",
            Self::Sum => "Sum",
            Self::Ratio => "Ratio",
            Self::Derived => "Derived",
            Self::Windowed => "Windowed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|metric_type| metric_type.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl Default for MetricType {
    fn default() -> Self {
        Self::Count
    }
}

/// Business version of a contract, `<major>.<minor>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractVersion {
    pub major: u32,
    pub minor: u32,
}

impl ContractVersion {
    pub const INITIAL: ContractVersion = ContractVersion { major: 1, minor: 0 };

    pub fn parse(raw: &str) -> Option<Self> {
        let (major, minor) = raw.trim().split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    pub fn next_minor(self) -> Self {
        Self {
            major: self.major,
            minor: self.minor.saturating_add(1),
        }
    }
}

impl Default for ContractVersion {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<String> for ContractVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid contract version '{}'", value))
    }
}

impl From<ContractVersion> for String {
    fn from(value: ContractVersion) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActorRole {
    User,
    Administrator,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Administrator => "administrator",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub name: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: ActorRole::User,
        }
    }

    pub fn administrator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: ActorRole::Administrator,
        }
    }

    pub fn is_administrator(&self) -> bool {
        self.role == ActorRole::Administrator
    }
}

/// The user-editable part of a contract, already normalized by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDefinition {
    pub name: String,
    pub domain: String,
    pub category: MetricCategory,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub business_owner: String,
    pub technical_steward: Option<String>,

    pub description: Option<String>,
    pub business_purpose: Option<String>,
    pub use_cases: Option<String>,
    pub exclusion_scenarios: Option<String>,
    pub unit_of_measure: Option<String>,
    pub interpretation_rules: Option<String>,

    pub abstract_inputs: Option<String>,
    pub aggregation_logic: Option<String>,
    pub window_logic: Option<String>,
    pub filter_rules: Option<String>,

    pub selected_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricContract {
    pub id: String,
    #[serde(flatten)]
    pub definition: ContractDefinition,
    /// `businessOwner` as it was at creation. Edits to the definition do not
    /// move revise rights.
    pub owner: String,
    pub status: ContractStatus,
    pub version: ContractVersion,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
}

impl MetricContract {
    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        self.owner == actor.name.trim()
    }
}

/// Raw form input for a new contract. Enum fields stay strings so invalid
/// selections can be reported instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricDraft {
    #[serde(alias = "metricName")]
    pub name: Option<String>,
    pub domain: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub version: Option<String>,
    /// Only `draft` is accepted; review states are reached through the lifecycle.
    pub status: Option<String>,
    pub business_owner: Option<String>,
    pub technical_steward: Option<String>,

    pub description: Option<String>,
    pub business_purpose: Option<String>,
    pub use_cases: Option<String>,
    pub exclusion_scenarios: Option<String>,
    pub unit_of_measure: Option<String>,
    pub interpretation_rules: Option<String>,

    pub abstract_inputs: Option<String>,
    pub aggregation_logic: Option<String>,
    pub window_logic: Option<String>,
    pub filter_rules: Option<String>,

    pub selected_columns: Vec<String>,
}

impl From<&ContractDefinition> for MetricDraft {
    fn from(definition: &ContractDefinition) -> Self {
        Self {
            name: Some(definition.name.clone()),
            domain: Some(definition.domain.clone()),
            category: Some(definition.category.as_str().to_string()),
            metric_type: Some(definition.metric_type.as_str().to_string()),
            version: None,
            status: None,
            business_owner: Some(definition.business_owner.clone()),
            technical_steward: definition.technical_steward.clone(),
            description: definition.description.clone(),
            business_purpose: definition.business_purpose.clone(),
            use_cases: definition.use_cases.clone(),
            exclusion_scenarios: definition.exclusion_scenarios.clone(),
            unit_of_measure: definition.unit_of_measure.clone(),
            interpretation_rules: definition.interpretation_rules.clone(),
            abstract_inputs: definition.abstract_inputs.clone(),
            aggregation_logic: definition.aggregation_logic.clone(),
            window_logic: definition.window_logic.clone(),
            filter_rules: definition.filter_rules.clone(),
            selected_columns: definition.selected_columns.clone(),
        }
    }
}

/// Output of a successful validation pass. Only the validator builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedContract {
    pub(crate) definition: ContractDefinition,
    pub(crate) version: ContractVersion,
}

impl ValidatedContract {
    pub fn definition(&self) -> &ContractDefinition {
        &self.definition
    }

    pub fn version(&self) -> ContractVersion {
        self.version
    }
}

/// Field edits for a draft or a revision. Absent fields are left untouched;
/// an empty string clears an optional text field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractChanges {
    #[serde(alias = "metricName")]
    pub name: Option<String>,
    pub domain: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub business_owner: Option<String>,
    pub technical_steward: Option<String>,

    pub description: Option<String>,
    pub business_purpose: Option<String>,
    pub use_cases: Option<String>,
    pub exclusion_scenarios: Option<String>,
    pub unit_of_measure: Option<String>,
    pub interpretation_rules: Option<String>,

    pub abstract_inputs: Option<String>,
    pub aggregation_logic: Option<String>,
    pub window_logic: Option<String>,
    pub filter_rules: Option<String>,

    pub selected_columns: Option<Vec<String>>,
}

impl ContractChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlays the changes on an existing definition, producing a draft
    /// that still has to go through the validator.
    pub fn overlay(&self, base: &ContractDefinition) -> MetricDraft {
        let mut draft = MetricDraft::from(base);
        let text_fields = [
            (&mut draft.name, &self.name),
            (&mut draft.domain, &self.domain),
            (&mut draft.category, &self.category),
            (&mut draft.metric_type, &self.metric_type),
            (&mut draft.business_owner, &self.business_owner),
            (&mut draft.technical_steward, &self.technical_steward),
            (&mut draft.description, &self.description),
            (&mut draft.business_purpose, &self.business_purpose),
            (&mut draft.use_cases, &self.use_cases),
            (&mut draft.exclusion_scenarios, &self.exclusion_scenarios),
            (&mut draft.unit_of_measure, &self.unit_of_measure),
            (&mut draft.interpretation_rules, &self.interpretation_rules),
            (&mut draft.abstract_inputs, &self.abstract_inputs),
            (&mut draft.aggregation_logic, &self.aggregation_logic),
            (&mut draft.window_logic, &self.window_logic),
            (&mut draft.filter_rules, &self.filter_rules),
        ];
        for (target, change) in text_fields {
            if let Some(value) = change {
                *target = Some(value.clone());
            }
        }
        if let Some(columns) = &self.selected_columns {
            draft.selected_columns = columns.clone();
        }
        draft
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    pub domain: Option<String>,
    pub owner: Option<String>,
}

impl ContractFilter {
    pub fn status(status: ContractStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, contract: &MetricContract) -> bool {
        if let Some(status) = self.status {
            if contract.status != status {
                return false;
            }
        }
        if let Some(domain) = self.domain.as_deref() {
            if !contract.definition.domain.eq_ignore_ascii_case(domain.trim()) {
                return false;
            }
        }
        if let Some(owner) = self.owner.as_deref() {
            if !contract.definition.business_owner.eq_ignore_ascii_case(owner.trim()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractEventKind {
    Created,
    Edited,
    Submitted,
    Approved,
    Rejected,
    Revised,
}

impl ContractEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Edited => "edited",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Revised => "revised",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [
            Self::Created,
            Self::Edited,
            Self::Submitted,
            Self::Approved,
            Self::Rejected,
            Self::Revised,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == raw)
    }
}

impl From<LifecycleEvent> for ContractEventKind {
    fn from(value: LifecycleEvent) -> Self {
        match value {
            LifecycleEvent::Submit => Self::Submitted,
            LifecycleEvent::Approve => Self::Approved,
            LifecycleEvent::Reject => Self::Rejected,
            LifecycleEvent::Revise => Self::Revised,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub id: String,
    pub contract_id: String,
    pub kind: ContractEventKind,
    pub from_status: Option<ContractStatus>,
    pub to_status: ContractStatus,
    pub actor: Option<String>,
    pub note: Option<String>,
    pub version: ContractVersion,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub draft: usize,
    pub in_review: usize,
    pub approved: usize,
    pub rejected: usize,
    pub total: usize,
}

impl StatusSummary {
    pub fn record(&mut self, status: ContractStatus) {
        match status {
            ContractStatus::Draft => self.draft += 1,
            ContractStatus::InReview => self.in_review += 1,
            ContractStatus::Approved => self.approved += 1,
            ContractStatus::Rejected => self.rejected += 1,
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Json,
    Md,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "json" => Some(Self::Json),
            "md" => Some(Self::Md),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Md => "md",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetail {
    pub contract: MetricContract,
    pub events: Vec<ContractEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub path: String,
}
