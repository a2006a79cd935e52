//! Create command: POST entries, plain or conditional

use folio_core::document::{DeclaredId, Document};
use folio_core::error::{FolioError, FolioResult};
use folio_core::event::Event;
use folio_core::query::Query;
use folio_core::types::{DocumentId, PreferReturn, ResourceType};
use tracing::debug;

use crate::command::{evaluate_condition, ConditionMatch, ExecContext, PostContext};
use crate::references::{resolve_first_pass, resolve_logical};
use crate::response::{OperationOutcome, ResultBody, ResultEntry};

#[derive(Debug)]
pub struct CreateCommand {
    pub index: usize,
    full_url: Option<String>,
    doc: Document,
    if_none_exist: Option<Query>,
    /// Identity reserved (or found) during pre-execute
    target: Option<DocumentId>,
    /// Conditional create matched an existing document; no write happens
    existing: Option<Document>,
    /// Durable state after execute
    created: Option<Document>,
}

impl CreateCommand {
    pub(crate) fn new(
        index: usize,
        full_url: Option<String>,
        resource_type: ResourceType,
        body: serde_json::Value,
        if_none_exist: Option<String>,
    ) -> Self {
        let if_none_exist =
            if_none_exist.map(|criteria| Query::parse(resource_type.clone(), &criteria));
        CreateCommand {
            index,
            full_url,
            doc: Document::new(resource_type, body),
            if_none_exist,
            target: None,
            existing: None,
            created: None,
        }
    }

    fn bad(&self, message: impl Into<String>) -> FolioError {
        FolioError::BadRequest {
            index: self.index,
            message: message.into(),
        }
    }

    pub(crate) fn pre_execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        let full_url = self
            .full_url
            .clone()
            .ok_or_else(|| self.bad("create entries require a full-url"))?;
        let temp = folio_core::types::parse_temp_urn(&full_url)
            .ok_or_else(|| self.bad(format!("full-url '{full_url}' is not a temporary urn")))?;

        // a body-declared id may only restate the entry's temporary urn
        match self.doc.declared() {
            None => {}
            Some(DeclaredId::Temporary(declared))
                if folio_core::types::parse_temp_urn(&declared) == Some(temp) => {}
            Some(other) => {
                return Err(self.bad(format!(
                    "declared id '{}' does not match the entry full-url",
                    other.id_part()
                )));
            }
        }

        let target = match &self.if_none_exist {
            None => DocumentId::fresh(self.doc.resource_type.clone()),
            Some(query) => match evaluate_condition(self.index, ctx.conn, query)? {
                ConditionMatch::None => DocumentId::fresh(self.doc.resource_type.clone()),
                ConditionMatch::One(existing) => {
                    let id = existing.id.ok_or_else(|| {
                        FolioError::Storage("stored document without id".into())
                    })?;
                    let target = DocumentId::new(existing.resource_type.clone(), id);
                    self.existing = Some(existing);
                    target
                }
                ConditionMatch::Many(_) => {
                    return Err(FolioError::ConditionalMatchAmbiguous {
                        resource_type: self.doc.resource_type.clone(),
                        criteria: query.criteria(),
                    });
                }
            },
        };

        ctx.ids
            .register(&full_url, target.clone())
            .map_err(|_| self.bad(format!("duplicate full-url '{full_url}'")))?;
        self.target = Some(target);
        Ok(())
    }

    pub(crate) fn execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        // re-check the condition: earlier commands in this bundle may
        // have created or deleted a matching document
        if let Some(query) = &self.if_none_exist {
            match evaluate_condition(self.index, ctx.conn, query)? {
                ConditionMatch::None => {
                    if self.existing.take().is_some() {
                        // the matched document was deleted earlier in this
                        // bundle; create under a fresh identity instead
                        self.target = Some(DocumentId::fresh(self.doc.resource_type.clone()));
                    }
                }
                ConditionMatch::One(existing) => {
                    debug!(
                        target: "folio::cmd",
                        index = self.index,
                        location = ?existing.location(),
                        "conditional create matched an existing document"
                    );
                    self.existing = Some(existing);
                    return Ok(());
                }
                ConditionMatch::Many(_) => {
                    return Err(FolioError::ConditionalMatchAmbiguous {
                        resource_type: self.doc.resource_type.clone(),
                        criteria: query.criteria(),
                    });
                }
            }
        }

        let target = self
            .target
            .clone()
            .ok_or_else(|| FolioError::Storage("create executed before pre-execute".into()))?;

        resolve_first_pass(self.index, &mut self.doc, ctx.ids, ctx.conn)?;
        resolve_logical(self.index, &mut self.doc, ctx.conn)?;

        let issues = ctx.validator.validate(&self.doc);
        let blocking: Vec<String> = issues
            .iter()
            .filter(|i| i.severity.blocks())
            .map(|i| i.message.clone())
            .collect();
        if !blocking.is_empty() {
            return Err(FolioError::ValidationFailed {
                index: self.index,
                issues: blocking,
            });
        }

        self.doc.set_assigned_id(target.id);
        ctx.gate.check_create_allowed(self.index, &self.doc)?;
        let created = ctx.conn.create_with_id(&self.doc, target.id)?;
        debug!(
            target: "folio::cmd",
            index = self.index,
            location = ?created.location(),
            "created document"
        );
        self.created = Some(created);
        Ok(())
    }

    pub(crate) fn post_execute(&mut self, ctx: &mut PostContext<'_>) -> FolioResult<ResultEntry> {
        if let Some(existing) = &self.existing {
            // idempotent conditional create: report the existing document
            let entry = ResultEntry::new(200).with_document_headers(existing);
            return Ok(match ctx.prefer_return {
                PreferReturn::Representation => {
                    entry.with_body(ResultBody::Resource(existing.clone()))
                }
                PreferReturn::OperationOutcome => entry.with_body(ResultBody::Outcome(
                    OperationOutcome::information("matched an existing document"),
                )),
                PreferReturn::Minimal => entry,
            });
        }

        let created = self
            .created
            .take()
            .ok_or_else(|| FolioError::Storage("create finished without a document".into()))?;
        ctx.events.handle(Event::Created(created.clone()));
        let entry = ResultEntry::new(201).with_document_headers(&created);
        Ok(match ctx.prefer_return {
            PreferReturn::Representation => entry.with_body(ResultBody::Resource(created)),
            PreferReturn::OperationOutcome => entry.with_body(ResultBody::Outcome(
                OperationOutcome::information("created"),
            )),
            PreferReturn::Minimal => entry,
        })
    }
}
