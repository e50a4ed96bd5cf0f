use crate::errors::{AppError, AppResult};
use crate::identity;
use crate::models::{
    ContractChanges, ContractEvent, ContractEventKind, ContractFilter, ContractStatus, MetricContract,
    ValidatedContract,
};
use crate::validation;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const MAX_IDENTIFIER_SUFFIX: u32 = 10_000;
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 8;

/// Storage/query interface behind [`ContractStore`].
///
/// Backends own atomicity: `insert_unique` must search and insert as one
/// step, and `compare_and_swap` must write the contract and its event
/// together or not at all.
pub trait ContractBackend: Send + Sync {
    /// Stores `contract` under the first free identifier among `base_id`,
    /// `base_id-2`, `base_id-3`, ... and returns the stored record.
    fn insert_unique(
        &self,
        base_id: &str,
        contract: MetricContract,
        event: ContractEvent,
    ) -> AppResult<MetricContract>;

    fn fetch(&self, id: &str) -> AppResult<Option<MetricContract>>;

    /// Matching contracts in insertion order.
    fn fetch_all(&self, filter: &ContractFilter) -> AppResult<Vec<MetricContract>>;

    /// Replaces the stored contract only if its revision is still
    /// `expected_revision`; fails with `AppError::Conflict` otherwise.
    fn compare_and_swap(
        &self,
        expected_revision: u64,
        contract: &MetricContract,
        event: &ContractEvent,
    ) -> AppResult<()>;

    fn events(&self, contract_id: &str) -> AppResult<Vec<ContractEvent>>;
}

/// Walks `base`, `base-2`, `base-3`, ... until `taken` reports a free key.
pub(crate) fn first_free_identifier<F>(base: &str, mut taken: F) -> AppResult<String>
where
    F: FnMut(&str) -> AppResult<bool>,
{
    if !taken(base)? {
        return Ok(base.to_string());
    }
    for n in 2..=MAX_IDENTIFIER_SUFFIX {
        let candidate = identity::with_suffix(base, n);
        if !taken(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(AppError::Internal(format!(
        "no free identifier left for base {}",
        base
    )))
}

pub(crate) fn new_event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Default)]
struct MemoryState {
    order: Vec<String>,
    contracts: HashMap<String, MetricContract>,
    events: Vec<ContractEvent>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("contract store mutex poisoned".to_string()))
    }
}

impl ContractBackend for MemoryBackend {
    fn insert_unique(
        &self,
        base_id: &str,
        mut contract: MetricContract,
        mut event: ContractEvent,
    ) -> AppResult<MetricContract> {
        let mut state = self.lock()?;
        let id = first_free_identifier(base_id, |candidate| Ok(state.contracts.contains_key(candidate)))?;
        contract.id = id.clone();
        event.contract_id = id.clone();
        state.order.push(id.clone());
        state.contracts.insert(id, contract.clone());
        state.events.push(event);
        Ok(contract)
    }

    fn fetch(&self, id: &str) -> AppResult<Option<MetricContract>> {
        let state = self.lock()?;
        Ok(state.contracts.get(id).cloned())
    }

    fn fetch_all(&self, filter: &ContractFilter) -> AppResult<Vec<MetricContract>> {
        let state = self.lock()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.contracts.get(id))
            .filter(|contract| filter.matches(contract))
            .cloned()
            .collect())
    }

    fn compare_and_swap(
        &self,
        expected_revision: u64,
        contract: &MetricContract,
        event: &ContractEvent,
    ) -> AppResult<()> {
        let mut state = self.lock()?;
        let stored = state
            .contracts
            .get_mut(&contract.id)
            .ok_or_else(|| AppError::NotFound(format!("Contract '{}' not found", contract.id)))?;
        if stored.revision != expected_revision {
            return Err(AppError::Conflict {
                id: contract.id.clone(),
                expected: expected_revision,
                actual: stored.revision,
            });
        }
        *stored = contract.clone();
        state.events.push(event.clone());
        Ok(())
    }

    fn events(&self, contract_id: &str) -> AppResult<Vec<ContractEvent>> {
        let state = self.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|event| event.contract_id == contract_id)
            .cloned()
            .collect())
    }
}

/// What a committed mutation records in the contract history.
#[derive(Debug, Clone)]
pub(crate) struct ChangeRecord {
    pub kind: ContractEventKind,
    pub actor: Option<String>,
    pub note: Option<String>,
}

/// Authoritative collection of contracts, keyed by identifier.
#[derive(Clone)]
pub struct ContractStore {
    backend: Arc<dyn ContractBackend>,
    max_commit_attempts: u32,
}

impl ContractStore {
    pub fn new(backend: Arc<dyn ContractBackend>) -> Self {
        Self {
            backend,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    pub fn create(&self, validated: ValidatedContract) -> AppResult<String> {
        self.create_at(validated, Utc::now())
    }

    /// Creates a draft with an identifier derived from `now`.
    pub fn create_at(&self, validated: ValidatedContract, now: DateTime<Utc>) -> AppResult<String> {
        validation::check_definition(&validated.definition).map_err(AppError::Validation)?;
        let base_id = identity::generate(&validated.definition.name, &validated.definition.domain, now)?;
        let contract = MetricContract {
            id: base_id.clone(),
            owner: validated.definition.business_owner.clone(),
            definition: validated.definition,
            status: ContractStatus::Draft,
            version: validated.version,
            review_notes: None,
            created_at: now,
            updated_at: now,
            revision: 1,
        };
        let event = ContractEvent {
            id: new_event_id(),
            contract_id: base_id.clone(),
            kind: ContractEventKind::Created,
            from_status: None,
            to_status: ContractStatus::Draft,
            actor: None,
            note: None,
            version: contract.version,
            occurred_at: now,
        };

        let stored = self.backend.insert_unique(&base_id, contract, event)?;
        if stored.id != base_id {
            tracing::debug!(base_id = %base_id, contract_id = %stored.id, "identifier collision resolved with suffix");
        }
        tracing::info!(contract_id = %stored.id, domain = %stored.definition.domain, "contract created");
        Ok(stored.id)
    }

    pub fn get(&self, id: &str) -> AppResult<MetricContract> {
        self.backend
            .fetch(id)?
            .ok_or_else(|| AppError::NotFound(format!("Contract '{}' not found", id)))
    }

    pub fn list(&self, filter: &ContractFilter) -> AppResult<Vec<MetricContract>> {
        self.backend.fetch_all(filter)
    }

    pub fn history(&self, id: &str) -> AppResult<Vec<ContractEvent>> {
        self.get(id)?;
        self.backend.events(id)
    }

    /// Edits fields of a draft contract. Status is not editable here, and
    /// any other state is locked even for an empty edit.
    pub fn update(&self, id: &str, changes: &ContractChanges) -> AppResult<MetricContract> {
        if changes.is_empty() {
            let current = self.get(id)?;
            ensure_editable(&current)?;
            return Ok(current);
        }
        self.commit_with(id, |contract| {
            ensure_editable(contract)?;
            let validated =
                validation::validate(&changes.overlay(&contract.definition)).map_err(AppError::Validation)?;
            contract.definition = validated.definition;
            Ok(ChangeRecord {
                kind: ContractEventKind::Edited,
                actor: None,
                note: None,
            })
        })
    }

    /// Loads the contract, applies `apply` to a copy and commits it with a
    /// compare-and-swap on `revision`. A lost race re-runs `apply` against
    /// the fresh state; an `apply` error leaves the store untouched.
    pub(crate) fn commit_with<F>(&self, id: &str, mut apply: F) -> AppResult<MetricContract>
    where
        F: FnMut(&mut MetricContract) -> AppResult<ChangeRecord>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.get(id)?;
            let mut next = current.clone();
            let change = apply(&mut next)?;

            let status_changed = next.status != current.status;
            let lifecycle_change = !matches!(change.kind, ContractEventKind::Created | ContractEventKind::Edited);
            if status_changed && !lifecycle_change {
                return Err(AppError::Internal(format!(
                    "status of contract {} can only change through a lifecycle transition",
                    id
                )));
            }
            if next.id != current.id
                || next.owner != current.owner
                || next.created_at != current.created_at
                || next.version < current.version
            {
                return Err(AppError::Internal(format!(
                    "immutable fields of contract {} were modified",
                    id
                )));
            }

            let now = Utc::now();
            next.revision = current.revision + 1;
            next.updated_at = now;
            let event = ContractEvent {
                id: new_event_id(),
                contract_id: next.id.clone(),
                kind: change.kind,
                from_status: Some(current.status),
                to_status: next.status,
                actor: change.actor,
                note: change.note,
                version: next.version,
                occurred_at: now,
            };

            match self.backend.compare_and_swap(current.revision, &next, &event) {
                Ok(()) => return Ok(next),
                Err(AppError::Conflict { .. }) if attempt < self.max_commit_attempts => {
                    tracing::debug!(contract_id = %id, attempt, "revision conflict, retrying commit");
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn ensure_editable(contract: &MetricContract) -> AppResult<()> {
    if contract.status == ContractStatus::Draft {
        return Ok(());
    }
    Err(AppError::ContractLocked {
        id: contract.id.clone(),
        status: contract.status,
    })
}

#[cfg(test)]
mod tests {
    use super::{first_free_identifier, ContractStore};
    use crate::errors::{AppError, ValidationIssue};
    use crate::models::{ContractChanges, ContractEventKind, ContractFilter, ContractStatus, MetricDraft};
    use crate::validation::validate;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};

    fn validated(name: &str, domain: &str, owner: &str) -> crate::models::ValidatedContract {
        validate(&MetricDraft {
            name: Some(name.to_string()),
            domain: Some(domain.to_string()),
            business_owner: Some(owner.to_string()),
            selected_columns: vec!["user_id".to_string()],
            ..MetricDraft::default()
        })
        .expect("valid draft")
    }

    fn fixed_time() -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(1_718_000_123_456).single().expect("timestamp")
    }

    #[test]
    fn create_then_get_round_trips_the_normalized_input() {
        let store = ContractStore::in_memory();
        let input = validated("Monthly Active Users", "Engagement", "Alice");
        let id = store.create_at(input.clone(), fixed_time()).expect("create");

        let stored = store.get(&id).expect("get");
        assert_eq!(id, "MAU-ENG-123456");
        assert_eq!(stored.definition, input.definition);
        assert_eq!(stored.version, input.version);
        assert_eq!(stored.status, ContractStatus::Draft);
        assert_eq!(stored.created_at, fixed_time());
        assert!(stored.review_notes.is_none());
    }

    #[test]
    fn same_millisecond_creates_get_suffixed_identifiers() {
        let store = ContractStore::in_memory();
        let first = store
            .create_at(validated("Gross Margin", "Finance", "Bob"), fixed_time())
            .expect("first");
        let second = store
            .create_at(validated("Gross Margin", "Finance", "Bob"), fixed_time())
            .expect("second");
        let third = store
            .create_at(validated("Gross Margin", "Finance", "Bob"), fixed_time())
            .expect("third");
        assert_eq!(first, "GM-FIN-123456");
        assert_eq!(second, "GM-FIN-123456-2");
        assert_eq!(third, "GM-FIN-123456-3");
    }

    #[test]
    fn concurrent_creates_never_share_an_identifier() {
        let store = Arc::new(ContractStore::in_memory());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store
                        .create_at(validated("Gross Margin", "Finance", "Bob"), fixed_time())
                        .expect("create")
                })
            })
            .collect();
        let ids: HashSet<String> = handles.into_iter().map(|handle| handle.join().expect("join")).collect();
        assert_eq!(ids.len(), 8);
        assert!(ids.contains("GM-FIN-123456"));
        assert!(ids.contains("GM-FIN-123456-2"));
    }

    #[test]
    fn list_keeps_insertion_order_and_filters() {
        let store = ContractStore::in_memory();
        let a = store.create(validated("Orders", "Sales", "Bob")).expect("a");
        let b = store.create(validated("Churn", "Risk", "Alice")).expect("b");
        let c = store.create(validated("Refunds", "sales", "alice")).expect("c");

        let all: Vec<String> = store
            .list(&ContractFilter::default())
            .expect("list")
            .into_iter()
            .map(|contract| contract.id)
            .collect();
        assert_eq!(all, vec![a.clone(), b.clone(), c.clone()]);

        let sales = store
            .list(&ContractFilter {
                domain: Some("SALES".to_string()),
                ..ContractFilter::default()
            })
            .expect("list sales");
        assert_eq!(sales.iter().map(|contract| contract.id.as_str()).collect::<Vec<_>>(), vec![a.as_str(), c.as_str()]);

        let alice = store.list(&ContractFilter::owner("Alice")).expect("list alice");
        assert_eq!(alice.len(), 2);
        assert!(store
            .list(&ContractFilter::status(ContractStatus::Approved))
            .expect("list approved")
            .is_empty());
    }

    #[test]
    fn draft_edits_are_validated_and_recorded() {
        let store = ContractStore::in_memory();
        let id = store.create(validated("Orders", "Sales", "Bob")).expect("create");

        let updated = store
            .update(
                &id,
                &ContractChanges {
                    description: Some("Orders placed per day".to_string()),
                    selected_columns: Some(vec!["order_id".to_string(), "placed_at".to_string()]),
                    ..ContractChanges::default()
                },
            )
            .expect("update");
        assert_eq!(updated.id, id);
        assert_eq!(updated.definition.description.as_deref(), Some("Orders placed per day"));
        assert_eq!(updated.revision, 2);

        let rejected = store.update(
            &id,
            &ContractChanges {
                name: Some("   ".to_string()),
                selected_columns: Some(vec!["x".to_string(), "x".to_string()]),
                ..ContractChanges::default()
            },
        );
        match rejected {
            Err(AppError::Validation(issues)) => assert_eq!(issues.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(store.get(&id).expect("get"), updated);

        let history = store.history(&id).expect("history");
        assert_eq!(
            history.iter().map(|event| event.kind).collect::<Vec<_>>(),
            vec![ContractEventKind::Created, ContractEventKind::Edited]
        );
    }

    #[test]
    fn hand_built_contracts_are_checked_before_insert() {
        let store = ContractStore::in_memory();
        let mut input = validated("Orders", "Sales", "Bob");
        input.definition.business_owner = String::new();
        input.definition.selected_columns = vec!["a".to_string(), "a".to_string()];

        match store.create_at(input, fixed_time()) {
            Err(AppError::Validation(issues)) => assert_eq!(
                issues,
                vec![
                    ValidationIssue::required("businessOwner"),
                    ValidationIssue::DuplicateColumn {
                        column: "a".to_string()
                    },
                ]
            ),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(store.list(&ContractFilter::default()).expect("list").is_empty());
    }

    #[test]
    fn empty_edit_outside_draft_is_locked() {
        let store = ContractStore::in_memory();
        let id = store.create(validated("Orders", "Sales", "Bob")).expect("create");
        let submitted = store
            .commit_with(&id, |contract| {
                contract.status = ContractStatus::InReview;
                Ok(super::ChangeRecord {
                    kind: ContractEventKind::Submitted,
                    actor: None,
                    note: None,
                })
            })
            .expect("submit");

        let result = store.update(&id, &ContractChanges::default());
        assert!(matches!(
            result,
            Err(AppError::ContractLocked {
                status: ContractStatus::InReview,
                ..
            })
        ));
        assert_eq!(store.get(&id).expect("get"), submitted);
    }

    #[test]
    fn owner_cannot_be_rewritten_by_a_commit() {
        let store = ContractStore::in_memory();
        let id = store.create(validated("Orders", "Sales", "Bob")).expect("create");
        let result = store.commit_with(&id, |contract| {
            contract.owner = "Mallory".to_string();
            Ok(super::ChangeRecord {
                kind: ContractEventKind::Edited,
                actor: None,
                note: None,
            })
        });
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(store.get(&id).expect("get").owner, "Bob");
    }

    #[test]
    fn unknown_identifiers_are_not_found() {
        let store = ContractStore::in_memory();
        assert!(matches!(store.get("NOPE-XXX-000000"), Err(AppError::NotFound(_))));
        assert!(matches!(
            store.update(
                "NOPE-XXX-000000",
                &ContractChanges {
                    description: Some("x".to_string()),
                    ..ContractChanges::default()
                }
            ),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(store.history("NOPE-XXX-000000"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn suffix_search_skips_taken_candidates() {
        let taken = ["A-B-000001", "A-B-000001-2"];
        let id = first_free_identifier("A-B-000001", |candidate| Ok(taken.contains(&candidate))).expect("free id");
        assert_eq!(id, "A-B-000001-3");
    }
}
