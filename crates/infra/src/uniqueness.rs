//! Name uniqueness check in the dispatch path.
//!
//! The guard consults the family's lookup projection, which is updated
//! asynchronously. Two creates racing ahead of the projection can both pass;
//! that window is accepted.

use std::sync::Arc;

use tracing::debug;

use babel_terms::{Family, TermCommand};

use crate::command_dispatcher::{CommandInterceptor, DispatchError};
use crate::projections::lookup::LookupProjection;

#[derive(Debug, Clone)]
pub struct UniquenessGuard {
    lookup: Arc<LookupProjection>,
}

impl UniquenessGuard {
    pub fn new(lookup: Arc<LookupProjection>) -> Self {
        Self { lookup }
    }

    pub fn family(&self) -> Family {
        self.lookup.family()
    }

    fn duplicate(&self, name: &str, id: impl core::fmt::Display) -> DispatchError {
        debug!(family = %self.family(), name, "rejected duplicate term");
        DispatchError::DuplicateName(format!(
            "{} with name `{name}` or id `{id}` already exists",
            self.family()
        ))
    }
}

impl CommandInterceptor<TermCommand> for UniquenessGuard {
    fn before_dispatch(&self, command: &TermCommand) -> Result<(), DispatchError> {
        match command {
            TermCommand::CreateTerm(cmd) => {
                if self
                    .lookup
                    .find_by_id_or_name(&cmd.term_id, &cmd.name)
                    .is_some()
                {
                    return Err(self.duplicate(&cmd.name, cmd.term_id));
                }
                Ok(())
            }
            TermCommand::UpdateTerm(cmd) => {
                let Some(name) = &cmd.name else {
                    return Ok(());
                };
                match self.lookup.get_by_name(name) {
                    Some(entry) if entry.term_id != cmd.term_id => {
                        Err(self.duplicate(name, entry.term_id))
                    }
                    _ => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use babel_events::{Event, EventEnvelope};
    use babel_terms::{CreateTerm, TermCreated, TermEvent, TermId, UpdateTerm};
    use chrono::Utc;
    use uuid::Uuid;

    fn guard_with(term_id: TermId, name: &str) -> UniquenessGuard {
        let lookup = Arc::new(LookupProjection::in_memory(Family::Label));
        let ev = TermEvent::TermCreated(TermCreated {
            family: Family::Label,
            term_id,
            name: name.to_string(),
            category: None,
            translations: vec![],
            occurred_at: Utc::now(),
        });
        lookup
            .apply_envelope(&EventEnvelope::new(
                Uuid::now_v7(),
                term_id.0,
                "catalog.label",
                ev.event_type(),
                1,
                1,
                serde_json::to_value(&ev).unwrap(),
            ))
            .unwrap();
        UniquenessGuard::new(lookup)
    }

    fn create(term_id: TermId, name: &str) -> TermCommand {
        TermCommand::CreateTerm(CreateTerm {
            term_id,
            family: Family::Label,
            name: name.to_string(),
            category: None,
            translations: vec![],
            occurred_at: Utc::now(),
        })
    }

    fn rename(term_id: TermId, name: &str) -> TermCommand {
        TermCommand::UpdateTerm(UpdateTerm {
            term_id,
            name: Some(name.to_string()),
            category: None,
            translations: vec![],
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_with_taken_name_or_id_is_rejected() {
        let existing = TermId::generate();
        let guard = guard_with(existing, "dup");

        match guard.before_dispatch(&create(TermId::generate(), "dup")).unwrap_err() {
            DispatchError::DuplicateName(msg) => {
                assert!(msg.starts_with("Label with name `dup` or id"));
                assert!(msg.ends_with("already exists"));
            }
            _ => panic!("Expected DuplicateName error"),
        }
        assert!(guard.before_dispatch(&create(existing, "fresh")).is_err());
        assert!(guard.before_dispatch(&create(TermId::generate(), "fresh")).is_ok());
    }

    #[test]
    fn update_only_conflicts_with_other_terms() {
        let existing = TermId::generate();
        let guard = guard_with(existing, "dup");

        assert!(guard.before_dispatch(&rename(existing, "dup")).is_ok());
        assert!(guard.before_dispatch(&rename(TermId::generate(), "dup")).is_err());
        assert!(guard.before_dispatch(&rename(TermId::generate(), "other")).is_ok());
    }
}
