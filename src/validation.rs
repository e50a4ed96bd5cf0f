use crate::errors::ValidationIssue;
use crate::models::{
    ContractDefinition, ContractStatus, ContractVersion, MetricCategory, MetricContract, MetricDraft, MetricType,
    ValidatedContract,
};
use std::collections::BTreeSet;

/// Checks a draft and returns the normalized contract, or every violation
/// found. Never touches the store.
pub fn validate(draft: &MetricDraft) -> Result<ValidatedContract, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let name = required_text(&draft.name, "name", &mut issues);
    let domain = required_text(&draft.domain, "domain", &mut issues);

    let category = match optional_text(&draft.category) {
        None => MetricCategory::default(),
        Some(raw) => MetricCategory::parse(&raw).unwrap_or_else(|| {
            issues.push(ValidationIssue::InvalidEnum {
                field: "category".to_string(),
                value: raw,
            });
            MetricCategory::default()
        }),
    };

    let metric_type = match optional_text(&draft.metric_type) {
        None => MetricType::default(),
        Some(raw) => MetricType::parse(&raw).unwrap_or_else(|| {
            issues.push(ValidationIssue::InvalidEnum {
                field: "type".to_string(),
                value: raw,
            });
            MetricType::default()
        }),
    };

    let version = match optional_text(&draft.version) {
        None => ContractVersion::INITIAL,
        Some(raw) => ContractVersion::parse(&raw).unwrap_or_else(|| {
            issues.push(ValidationIssue::InvalidVersion { value: raw });
            ContractVersion::INITIAL
        }),
    };

    if let Some(raw) = optional_text(&draft.status) {
        if !raw.eq_ignore_ascii_case(ContractStatus::Draft.as_str()) {
            issues.push(ValidationIssue::InvalidEnum {
                field: "status".to_string(),
                value: raw,
            });
        }
    }

    let business_owner = required_text(&draft.business_owner, "businessOwner", &mut issues);
    let selected_columns = normalize_columns(&draft.selected_columns, &mut issues);

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(ValidatedContract {
        definition: ContractDefinition {
            name,
            domain,
            category,
            metric_type,
            business_owner,
            technical_steward: optional_text(&draft.technical_steward),
            description: optional_text(&draft.description),
            business_purpose: optional_text(&draft.business_purpose),
            use_cases: optional_text(&draft.use_cases),
            exclusion_scenarios: optional_text(&draft.exclusion_scenarios),
            unit_of_measure: optional_text(&draft.unit_of_measure),
            interpretation_rules: optional_text(&draft.interpretation_rules),
            abstract_inputs: optional_text(&draft.abstract_inputs),
            aggregation_logic: optional_text(&draft.aggregation_logic),
            window_logic: optional_text(&draft.window_logic),
            filter_rules: optional_text(&draft.filter_rules),
            selected_columns,
        },
        version,
    })
}

/// Re-checks a stored contract before it may leave draft.
pub fn validate_for_submission(contract: &MetricContract) -> Result<(), Vec<ValidationIssue>> {
    check_definition(&contract.definition)
}

/// Required-field and column rules for an already normalized definition.
pub fn check_definition(definition: &ContractDefinition) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    for (field, value) in [
        ("name", &definition.name),
        ("domain", &definition.domain),
        ("businessOwner", &definition.business_owner),
    ] {
        if value.trim().is_empty() {
            issues.push(ValidationIssue::required(field));
        }
    }
    normalize_columns(&definition.selected_columns, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn required_text(value: &Option<String>, field: &str, issues: &mut Vec<ValidationIssue>) -> String {
    match optional_text(value) {
        Some(text) => text,
        None => {
            issues.push(ValidationIssue::required(field));
            String::new()
        }
    }
}

fn optional_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

fn normalize_columns(columns: &[String], issues: &mut Vec<ValidationIssue>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    let mut normalized = Vec::with_capacity(columns.len());
    let mut blank_reported = false;

    for column in columns {
        let column = column.trim();
        if column.is_empty() {
            if !blank_reported {
                issues.push(ValidationIssue::required("selectedColumns"));
                blank_reported = true;
            }
            continue;
        }
        if !seen.insert(column.to_string()) {
            if reported.insert(column.to_string()) {
                issues.push(ValidationIssue::DuplicateColumn {
                    column: column.to_string(),
                });
            }
            continue;
        }
        normalized.push(column.to_string());
    }
    normalized
}
