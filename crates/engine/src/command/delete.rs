//! Delete command: DELETE entries, by id or by condition

use folio_core::error::{FolioError, FolioResult};
use folio_core::event::Event;
use folio_core::query::Query;
use folio_core::types::{DocumentId, PreferReturn};
use tracing::debug;

use crate::command::{evaluate_condition, ConditionMatch, ExecContext, PostContext};
use crate::entry::RequestTarget;
use crate::response::{OperationOutcome, ResultBody, ResultEntry};

#[derive(Debug)]
enum Mode {
    ById(DocumentId),
    Conditional(Query),
}

#[derive(Debug)]
pub struct DeleteCommand {
    pub index: usize,
    url: String,
    mode: Option<Mode>,
    /// Identity removed during execute; `None` when nothing was live
    deleted: Option<DocumentId>,
}

impl DeleteCommand {
    pub(crate) fn new(index: usize, url: String) -> Self {
        DeleteCommand {
            index,
            url,
            mode: None,
            deleted: None,
        }
    }

    pub(crate) fn pre_execute(&mut self, _ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        self.mode = Some(match RequestTarget::parse(self.index, &self.url)? {
            RequestTarget::TypeId(resource_type, id) => {
                Mode::ById(DocumentId::new(resource_type, id))
            }
            RequestTarget::TypeQuery(query) => Mode::Conditional(query),
            RequestTarget::Type(_) | RequestTarget::TypeIdVersion(..) => {
                return Err(FolioError::BadRequest {
                    index: self.index,
                    message: "deletes target 'Type/{id}' or 'Type?criteria'".to_string(),
                });
            }
        });
        Ok(())
    }

    pub(crate) fn execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        let target = match &self.mode {
            Some(Mode::ById(id)) => id.clone(),
            Some(Mode::Conditional(query)) => {
                match evaluate_condition(self.index, ctx.conn, query)? {
                    ConditionMatch::None => return Ok(()),
                    ConditionMatch::One(found) => {
                        let id = found
                            .id
                            .ok_or_else(|| FolioError::Storage("stored document without id".into()))?;
                        DocumentId::new(found.resource_type.clone(), id)
                    }
                    ConditionMatch::Many(_) => {
                        return Err(FolioError::ConditionalMatchAmbiguous {
                            resource_type: query.resource_type.clone(),
                            criteria: query.criteria(),
                        });
                    }
                }
            }
            None => return Err(FolioError::Storage("delete executed before pre-execute".into())),
        };

        let existing = ctx
            .conn
            .read_including_deleted(&target.resource_type, target.id)?;
        let Some(existing) = existing else {
            // never existed; deleting is a no-op
            return Ok(());
        };
        ctx.gate.check_delete_allowed(self.index, &existing)?;

        if ctx.conn.delete(&target.resource_type, target.id)? {
            debug!(target: "folio::cmd", index = self.index, id = %target, "deleted document");
            // later commands must not resolve references to the removed
            // document through the translation table
            ctx.ids.invalidate(&target);
            self.deleted = Some(target);
        }
        Ok(())
    }

    pub(crate) fn post_execute(&mut self, ctx: &mut PostContext<'_>) -> FolioResult<ResultEntry> {
        match self.deleted.take() {
            Some(id) => {
                ctx.events
                    .handle(Event::Deleted(id.resource_type.clone(), id.id));
                let entry = ResultEntry::new(200);
                Ok(match ctx.prefer_return {
                    PreferReturn::OperationOutcome => entry.with_body(ResultBody::Outcome(
                        OperationOutcome::information(format!("deleted {id}")),
                    )),
                    _ => entry,
                })
            }
            // already absent
            None => Ok(ResultEntry::new(204)),
        }
    }
}
