use crate::errors::{AppError, AppResult};
use crate::models::{Actor, ContractChanges, ContractStatus, LifecycleEvent, MetricContract};
use crate::store::{ChangeRecord, ContractStore};
use crate::validation;

/// The transition table. `None` means the event is illegal in `current`.
pub fn next_status(current: ContractStatus, event: LifecycleEvent) -> Option<ContractStatus> {
    match (current, event) {
        (ContractStatus::Draft, LifecycleEvent::Submit) => Some(ContractStatus::InReview),
        (ContractStatus::InReview, LifecycleEvent::Approve) => Some(ContractStatus::Approved),
        (ContractStatus::InReview, LifecycleEvent::Reject) => Some(ContractStatus::Rejected),
        (ContractStatus::Rejected | ContractStatus::Approved, LifecycleEvent::Revise) => Some(ContractStatus::Draft),
        _ => None,
    }
}

fn ensure_transition(current: ContractStatus, event: LifecycleEvent) -> AppResult<ContractStatus> {
    next_status(current, event).ok_or(AppError::IllegalTransition { current, event })
}

fn require_administrator(actor: &Actor, event: LifecycleEvent) -> AppResult<()> {
    if actor.is_administrator() {
        return Ok(());
    }
    Err(AppError::Permission {
        actor: actor.name.clone(),
        event,
        reason: "administrator role required".to_string(),
    })
}

fn require_owner(actor: &Actor, contract: &MetricContract) -> AppResult<()> {
    if contract.is_owned_by(actor) {
        return Ok(());
    }
    Err(AppError::Permission {
        actor: actor.name.clone(),
        event: LifecycleEvent::Revise,
        reason: format!("only the owner {} may revise it", contract.owner),
    })
}

/// Moves contracts through draft, review, approval and rejection.
///
/// Every transition is checked in the same order: the state table first,
/// then the actor, then field rules. Whatever fails first is returned and
/// nothing is committed.
#[derive(Clone)]
pub struct LifecycleEngine {
    store: ContractStore,
}

impl LifecycleEngine {
    pub fn new(store: ContractStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ContractStore {
        &self.store
    }

    pub fn submit(&self, id: &str) -> AppResult<MetricContract> {
        self.transition(id, LifecycleEvent::Submit, None, |contract| {
            validation::validate_for_submission(contract).map_err(AppError::Validation)?;
            Ok(None)
        })
    }

    pub fn approve(&self, id: &str, actor: &Actor) -> AppResult<MetricContract> {
        self.transition(id, LifecycleEvent::Approve, Some(actor), |_| {
            require_administrator(actor, LifecycleEvent::Approve)?;
            Ok(None)
        })
    }

    pub fn reject(&self, id: &str, actor: &Actor, note: Option<&str>) -> AppResult<MetricContract> {
        let note = note.map(str::trim).filter(|note| !note.is_empty()).map(ToString::to_string);
        self.transition(id, LifecycleEvent::Reject, Some(actor), |contract| {
            require_administrator(actor, LifecycleEvent::Reject)?;
            contract.review_notes = note.clone();
            Ok(note.clone())
        })
    }

    /// Sends an approved or rejected contract back to draft, optionally
    /// applying field changes in the same commit.
    pub fn revise(&self, id: &str, actor: &Actor, changes: &ContractChanges) -> AppResult<MetricContract> {
        self.transition(id, LifecycleEvent::Revise, Some(actor), |contract| {
            require_owner(actor, contract)?;
            match contract.status {
                ContractStatus::Approved => contract.version = contract.version.next_minor(),
                ContractStatus::Rejected => contract.review_notes = None,
                _ => {}
            }
            if !changes.is_empty() {
                let validated = validation::validate(&changes.overlay(&contract.definition))
                    .map_err(AppError::Validation)?;
                contract.definition = validated.definition;
            }
            Ok(None)
        })
    }

    /// Runs one table-checked transition as a single commit. `apply` sees the
    /// contract still in its source state and may reject it or set side
    /// fields; the status itself is set here.
    fn transition<F>(
        &self,
        id: &str,
        event: LifecycleEvent,
        actor: Option<&Actor>,
        mut apply: F,
    ) -> AppResult<MetricContract>
    where
        F: FnMut(&mut MetricContract) -> AppResult<Option<String>>,
    {
        let result = self.store.commit_with(id, |contract| {
            let from = contract.status;
            let to = ensure_transition(from, event)?;
            let note = apply(contract)?;
            contract.status = to;
            Ok(ChangeRecord {
                kind: event.into(),
                actor: actor.map(|actor| actor.name.clone()),
                note,
            })
        });

        match &result {
            Ok(contract) => tracing::info!(
                contract_id = %contract.id,
                event = %event,
                to = %contract.status,
                version = %contract.version,
                actor = actor.map(|actor| actor.name.as_str()).unwrap_or("-"),
                "contract transitioned"
            ),
            Err(error @ AppError::Permission { .. }) => {
                tracing::warn!(contract_id = %id, event = %event, error = %error, "transition denied")
            }
            Err(error) => tracing::debug!(contract_id = %id, event = %event, error = %error, "transition rejected"),
        }
        result
    }
}
