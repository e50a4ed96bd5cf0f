use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::lifecycle::LifecycleEngine;
use crate::models::{
    Actor, ContractChanges, ContractDetail, ContractEvent, ContractFilter, ContractStatus, ExportFormat,
    ExportResponse, MetricContract, MetricDraft, StatusSummary,
};
use crate::settings::{GovernanceSettings, StorageKind};
use crate::store::{ContractStore, MemoryBackend};
use crate::validation;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// Entry point for the presentation layer.
#[derive(Clone)]
pub struct GovernanceCore {
    store: ContractStore,
    lifecycle: LifecycleEngine,
    export_dir: PathBuf,
}

impl GovernanceCore {
    pub fn new(store: ContractStore, export_dir: PathBuf) -> Self {
        Self {
            lifecycle: LifecycleEngine::new(store.clone()),
            store,
            export_dir,
        }
    }

    pub fn from_settings(settings: &GovernanceSettings) -> AppResult<Self> {
        let store = match settings.storage {
            StorageKind::Memory => ContractStore::new(Arc::new(MemoryBackend::new())),
            StorageKind::Sqlite => ContractStore::new(Arc::new(Database::new(&settings.database_path())?)),
        }
        .with_max_commit_attempts(settings.max_commit_attempts);
        tracing::info!(storage = ?settings.storage, data_dir = %settings.data_dir.display(), "governance core ready");
        Ok(Self::new(store, settings.export_dir()))
    }

    pub fn create_metric(&self, draft: MetricDraft) -> AppResult<String> {
        self.create_metric_at(draft, Utc::now())
    }

    pub fn create_metric_at(&self, draft: MetricDraft, now: DateTime<Utc>) -> AppResult<String> {
        let validated = validation::validate(&draft).map_err(|issues| {
            tracing::debug!(issue_count = issues.len(), "metric draft rejected");
            AppError::Validation(issues)
        })?;
        self.store.create_at(validated, now)
    }

    pub fn list_metrics(&self, filter: &ContractFilter) -> AppResult<Vec<MetricContract>> {
        self.store.list(filter)
    }

    pub fn get_metric(&self, id: &str) -> AppResult<MetricContract> {
        self.store.get(id)
    }

    pub fn submit_for_review(&self, id: &str) -> AppResult<MetricContract> {
        self.lifecycle.submit(id)
    }

    pub fn approve(&self, id: &str, actor: &Actor) -> AppResult<MetricContract> {
        self.lifecycle.approve(id, actor)
    }

    pub fn reject(&self, id: &str, actor: &Actor, note: Option<&str>) -> AppResult<MetricContract> {
        self.lifecycle.reject(id, actor, note)
    }

    pub fn revise_contract(&self, id: &str, actor: &Actor, changes: &ContractChanges) -> AppResult<MetricContract> {
        self.lifecycle.revise(id, actor, changes)
    }

    pub fn edit_draft(&self, id: &str, changes: &ContractChanges) -> AppResult<MetricContract> {
        self.store.update(id, changes)
    }

    pub fn contract_history(&self, id: &str) -> AppResult<Vec<ContractEvent>> {
        self.store.history(id)
    }

    pub fn owner_dashboard(&self, owner: &str) -> AppResult<Vec<MetricContract>> {
        self.store.list(&ContractFilter::owner(owner))
    }

    pub fn review_queue(&self) -> AppResult<Vec<MetricContract>> {
        self.store.list(&ContractFilter::status(ContractStatus::InReview))
    }

    pub fn status_summary(&self) -> AppResult<StatusSummary> {
        let mut summary = StatusSummary::default();
        for contract in self.store.list(&ContractFilter::default())? {
            summary.record(contract.status);
        }
        Ok(summary)
    }

    pub fn export_contract(&self, id: &str, format: &str) -> AppResult<ExportResponse> {
        let format = ExportFormat::parse(format)
            .ok_or_else(|| AppError::InvalidInput(format!("Unsupported export format {}", format)))?;
        let detail = ContractDetail {
            contract: self.store.get(id)?,
            events: self.store.history(id)?,
        };

        std::fs::create_dir_all(&self.export_dir).map_err(|error| AppError::Io(error.to_string()))?;
        let output_path = self
            .export_dir
            .join(format!("{}.{}", sanitize_filename_component(id), format.extension()));
        if !output_path.starts_with(&self.export_dir) {
            return Err(AppError::Io("Resolved export path escaped export directory".to_string()));
        }
        let contents = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&detail)?,
            ExportFormat::Md => render_markdown_export(&detail),
        };

        std::fs::write(&output_path, contents).map_err(|error| AppError::Io(error.to_string()))?;
        tracing::info!(contract_id = %id, path = %output_path.display(), "contract exported");
        Ok(ExportResponse {
            path: output_path.to_string_lossy().to_string(),
        })
    }
}

/// Export file stem for a contract id: runs of anything outside
/// `[A-Za-z0-9_-]` become one `_`.
fn sanitize_filename_component(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for ch in id.chars() {
        let keep = ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_');
        if keep {
            stem.push(ch);
        } else if !stem.ends_with('_') {
            stem.push('_');
        }
    }
    let stem: String = stem.trim_matches('_').chars().take(120).collect();
    if stem.is_empty() {
        "contract".to_string()
    } else {
        stem
    }
}

fn render_markdown_export(detail: &ContractDetail) -> String {
    let contract = &detail.contract;
    let definition = &contract.definition;
    let mut out = String::new();
    out.push_str(&format!("# {} ({})\n\n", definition.name, contract.id));
    out.push_str(&format!("- status: {}\n", contract.status));
    out.push_str(&format!("- version: {}\n", contract.version));
    out.push_str(&format!("- domain: {}\n", definition.domain));
    out.push_str(&format!("- category: {}\n", definition.category.as_str()));
    out.push_str(&format!("- type: {}\n", definition.metric_type.as_str()));
    out.push_str(&format!("- business owner: {}\n", definition.business_owner));
    if let Some(steward) = &definition.technical_steward {
        out.push_str(&format!("- technical steward: {}\n", steward));
    }
    if let Some(notes) = &contract.review_notes {
        out.push_str(&format!("- review notes: {}\n", notes));
    }

    let sections = [
        (
            "Business Definition",
            vec![
                ("Description", &definition.description),
                ("Business purpose", &definition.business_purpose),
                ("Use cases", &definition.use_cases),
                ("Exclusion scenarios", &definition.exclusion_scenarios),
                ("Unit of measure", &definition.unit_of_measure),
                ("Interpretation rules", &definition.interpretation_rules),
            ],
        ),
        (
            "Formula",
            vec![
                ("Abstract inputs", &definition.abstract_inputs),
                ("Aggregation logic", &definition.aggregation_logic),
                ("Window logic", &definition.window_logic),
                ("Filter rules", &definition.filter_rules),
            ],
        ),
    ];
    for (title, fields) in sections {
        let present: Vec<_> = fields
            .into_iter()
            .filter_map(|(label, value)| value.as_deref().map(|value| (label, value)))
            .collect();
        if present.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {}\n\n", title));
        for (label, value) in present {
            out.push_str(&format!("**{}:** {}\n\n", label, value));
        }
    }

    if !definition.selected_columns.is_empty() {
        out.push_str("\n## Selected Columns\n\n");
        for column in &definition.selected_columns {
            out.push_str(&format!("- `{}`\n", column));
        }
    }

    out.push_str("\n## History\n\n");
    for event in &detail.events {
        out.push_str(&format!(
            "- `{}` {} -> {} ({}){}\n",
            event.occurred_at.to_rfc3339(),
            event.kind.as_str(),
            event.to_status,
            event.actor.as_deref().unwrap_or("-"),
            event
                .note
                .as_deref()
                .map(|note| format!(": {}", note))
                .unwrap_or_default()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{sanitize_filename_component, GovernanceCore};
    use crate::models::{Actor, ContractStatus, MetricDraft};
    use crate::settings::GovernanceSettings;

    fn core_in(dir: &std::path::Path) -> GovernanceCore {
        GovernanceCore::from_settings(&GovernanceSettings::ephemeral(dir)).expect("core")
    }

    fn draft(name: &str, owner: &str) -> MetricDraft {
        MetricDraft {
            name: Some(name.to_string()),
            domain: Some("Revenue Ops".to_string()),
            business_owner: Some(owner.to_string()),
            ..MetricDraft::default()
        }
    }

    #[test]
    fn dashboards_split_by_owner_and_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core_in(dir.path());
        let admin = Actor::administrator("Root");

        let a = core.create_metric(draft("Annual Recurring Revenue", "Alice")).expect("a");
        let b = core.create_metric(draft("Net Dollar Retention", "Bob")).expect("b");
        let c = core.create_metric(draft("Expansion Revenue", "Alice")).expect("c");
        core.submit_for_review(&a).expect("submit a");
        core.submit_for_review(&b).expect("submit b");
        core.approve(&b, &admin).expect("approve b");

        let alice: Vec<String> = core
            .owner_dashboard("Alice")
            .expect("alice")
            .into_iter()
            .map(|contract| contract.id)
            .collect();
        assert_eq!(alice, vec![a.clone(), c]);

        let queue = core.review_queue().expect("queue");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, a);

        let summary = core.status_summary().expect("summary");
        assert_eq!((summary.draft, summary.in_review, summary.approved, summary.rejected), (1, 1, 1, 0));
        assert_eq!(summary.total, 3);
    }

    #[test]
    fn exports_json_and_markdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core_in(dir.path());
        let mut input = draft("Annual Recurring Revenue", "Alice");
        input.aggregation_logic = Some("SUM(contract_value)".to_string());
        input.selected_columns = vec!["contract_value".to_string()];
        let id = core.create_metric(input).expect("create");
        core.submit_for_review(&id).expect("submit");
        core.reject(&id, &Actor::administrator("Root"), Some("add exclusions")).expect("reject");

        let json_path = core.export_contract(&id, "json").expect("json export").path;
        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).expect("read json")).expect("parse json");
        assert_eq!(exported["contract"]["id"], serde_json::json!(id));
        assert_eq!(exported["contract"]["status"], serde_json::json!("rejected"));
        assert_eq!(exported["contract"]["version"], serde_json::json!("1.0"));
        assert_eq!(exported["events"].as_array().map(Vec::len), Some(3));

        let md_path = core.export_contract(&id, "md").expect("md export").path;
        let markdown = std::fs::read_to_string(md_path).expect("read md");
        assert!(markdown.contains("**Aggregation logic:** SUM(contract_value)"));
        assert!(markdown.contains("- `contract_value`"));
        assert!(markdown.contains("rejected -> rejected (Root): add exclusions"));

        let status = core.get_metric(&id).expect("get").status;
        assert_eq!(status, ContractStatus::Rejected);
        assert_eq!(core.export_contract(&id, "pdf").expect_err("pdf").code(), "INVALID_INPUT");
    }

    #[test]
    fn filename_component_is_sanitized() {
        assert_eq!(sanitize_filename_component("ARR-REV-000123-2"), "ARR-REV-000123-2");
        assert_eq!(sanitize_filename_component("../x y"), "x_y");
        assert_eq!(sanitize_filename_component("///"), "contract");
        assert_eq!(sanitize_filename_component("NRR FIN::000042"), "NRR_FIN_000042");
    }
}
