//! Commands: one per bundle entry, executed in three phases
//!
//! Each bundle entry becomes one command (plus a synthetic
//! check-references command when the body carries references). Commands
//! run in three phases over the whole list: `pre_execute` reserves ids
//! and validates entry shape, `execute` performs the storage work, and
//! `post_execute` builds the result entry and emits events.

mod batch;
mod check_refs;
mod create;
mod delete;
mod factory;
mod read;
mod transaction;
mod update;

pub use batch::BatchCommandList;
pub use check_refs::CheckReferencesCommand;
pub use create::CreateCommand;
pub use delete::DeleteCommand;
pub use factory::{build_commands, CommandList};
pub use read::ReadCommand;
pub use transaction::TransactionCommandList;
pub use update::UpdateCommand;

use folio_core::document::Document;
use folio_core::error::{FolioError, FolioResult};
use folio_core::query::{Page, Query};
use folio_core::traits::{StoreConnection, Validator};
use folio_core::types::{PreferHandling, PreferReturn};

use crate::authorization::AuthorizationGate;
use crate::events::EventBuffer;
use crate::ids::IdTranslation;
use crate::response::ResultEntry;
use crate::EngineConfig;

/// Execution order within a transaction bundle; lower runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Delete = 1,
    Create = 2,
    Update = 3,
    CheckReferences = 4,
    Read = 5,
}

/// Shared state handed to the pre-execute and execute phases
pub struct ExecContext<'a> {
    pub ids: &'a mut IdTranslation,
    pub conn: &'a mut dyn StoreConnection,
    pub validator: &'a dyn Validator,
    pub gate: &'a AuthorizationGate,
    pub config: &'a EngineConfig,
    pub handling: PreferHandling,
}

/// Shared state handed to the post-execute phase
pub struct PostContext<'a> {
    pub events: &'a mut EventBuffer,
    pub prefer_return: PreferReturn,
}

/// One executable operation derived from a bundle entry
#[derive(Debug)]
pub enum Command {
    Create(CreateCommand),
    Read(ReadCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
    CheckReferences(CheckReferencesCommand),
}

impl Command {
    /// Zero-based index of the originating entry
    pub fn index(&self) -> usize {
        match self {
            Command::Create(c) => c.index,
            Command::Read(c) => c.index,
            Command::Update(c) => c.index,
            Command::Delete(c) => c.index,
            Command::CheckReferences(c) => c.index,
        }
    }

    /// Transaction ordering class
    pub fn priority(&self) -> Priority {
        match self {
            Command::Create(_) => Priority::Create,
            Command::Read(_) => Priority::Read,
            Command::Update(_) => Priority::Update,
            Command::Delete(_) => Priority::Delete,
            Command::CheckReferences(_) => Priority::CheckReferences,
        }
    }

    /// True when the command writes to the store
    pub fn is_modifying(&self) -> bool {
        matches!(
            self,
            Command::Create(_) | Command::Update(_) | Command::Delete(_)
        )
    }

    /// Operation name for logging
    pub fn operation(&self) -> &'static str {
        match self {
            Command::Create(_) => "create",
            Command::Read(c) => {
                if c.head {
                    "head"
                } else {
                    "read"
                }
            }
            Command::Update(_) => "update",
            Command::Delete(_) => "delete",
            Command::CheckReferences(_) => "check-references",
        }
    }

    pub fn pre_execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        match self {
            Command::Create(c) => c.pre_execute(ctx),
            Command::Read(c) => c.pre_execute(ctx),
            Command::Update(c) => c.pre_execute(ctx),
            Command::Delete(c) => c.pre_execute(ctx),
            Command::CheckReferences(c) => c.pre_execute(ctx),
        }
    }

    pub fn execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        match self {
            Command::Create(c) => c.execute(ctx),
            Command::Read(c) => c.execute(ctx),
            Command::Update(c) => c.execute(ctx),
            Command::Delete(c) => c.execute(ctx),
            Command::CheckReferences(c) => c.execute(ctx),
        }
    }

    /// Build the result entry; `None` for synthetic commands that do
    /// not own a response slot
    pub fn post_execute(&mut self, ctx: &mut PostContext<'_>) -> FolioResult<Option<ResultEntry>> {
        match self {
            Command::Create(c) => c.post_execute(ctx).map(Some),
            Command::Read(c) => c.post_execute(ctx).map(Some),
            Command::Update(c) => c.post_execute(ctx).map(Some),
            Command::Delete(c) => c.post_execute(ctx).map(Some),
            Command::CheckReferences(_) => Ok(None),
        }
    }
}

/// Outcome of evaluating conditional criteria
pub(crate) enum ConditionMatch {
    None,
    One(Document),
    Many(usize),
}

/// Evaluate `Type?criteria` against current state
///
/// Unsupported parameters are always fatal on conditional mutations.
pub(crate) fn evaluate_condition(
    index: usize,
    conn: &dyn StoreConnection,
    query: &Query,
) -> FolioResult<ConditionMatch> {
    let unsupported = conn.unsupported_parameters(query);
    if !unsupported.is_empty() {
        return Err(FolioError::BadRequest {
            index,
            message: format!(
                "conditional criteria use unsupported parameters: {}",
                unsupported.join(", ")
            ),
        });
    }
    let result = conn.search(query, Page::single())?;
    Ok(match result.total {
        0 => ConditionMatch::None,
        1 => {
            let doc = result
                .matches
                .into_iter()
                .next()
                .ok_or_else(|| FolioError::Storage("search page missing its single match".into()))?;
            ConditionMatch::One(doc)
        }
        n => ConditionMatch::Many(n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Delete < Priority::Create);
        assert!(Priority::Create < Priority::Update);
        assert!(Priority::Update < Priority::CheckReferences);
        assert!(Priority::CheckReferences < Priority::Read);
    }
}
