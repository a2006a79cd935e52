//! Update command: PUT entries, by id or by condition

use folio_core::document::{DeclaredId, Document};
use folio_core::error::{FolioError, FolioResult};
use folio_core::event::Event;
use folio_core::query::Query;
use folio_core::types::{parse_temp_urn, DocumentId, PreferReturn, ResourceType, TEMP_URN_PREFIX};
use tracing::debug;
use uuid::Uuid;

use crate::command::{evaluate_condition, ConditionMatch, ExecContext, PostContext};
use crate::entry::{parse_etag, RequestTarget};
use crate::references::{resolve_first_pass, resolve_logical};
use crate::response::{OperationOutcome, ResultBody, ResultEntry};

#[derive(Debug)]
enum Mode {
    /// `PUT Type/{id}`
    ById,
    /// `PUT Type?criteria`
    Conditional(Query),
}

#[derive(Debug)]
pub struct UpdateCommand {
    pub index: usize,
    full_url: Option<String>,
    url: String,
    doc: Document,
    if_match: Option<String>,
    mode: Option<Mode>,
    /// Identity the write will land on, fixed during pre-execute
    target: Option<DocumentId>,
    /// Conditional update with zero matches becomes a create
    as_create: bool,
    updated: Option<Document>,
}

impl UpdateCommand {
    pub(crate) fn new(
        index: usize,
        full_url: Option<String>,
        url: String,
        resource_type: ResourceType,
        body: serde_json::Value,
        if_match: Option<String>,
    ) -> Self {
        UpdateCommand {
            index,
            full_url,
            url,
            doc: Document::new(resource_type, body),
            if_match,
            mode: None,
            target: None,
            as_create: false,
            updated: None,
        }
    }

    fn bad(&self, message: impl Into<String>) -> FolioError {
        FolioError::BadRequest {
            index: self.index,
            message: message.into(),
        }
    }

    /// The body-declared persistent id, when one is declared
    ///
    /// Temporary declarations count as "no persistent id"; an absolute
    /// declaration must use the server's own base url.
    fn declared_persistent_id(&self, base_url: Option<&str>) -> FolioResult<Option<Uuid>> {
        match self.doc.declared() {
            None | Some(DeclaredId::Temporary(_)) => Ok(None),
            Some(DeclaredId::Plain(raw)) => {
                let id = Uuid::parse_str(&raw)
                    .map_err(|_| self.bad(format!("declared id '{raw}' is not a valid id")))?;
                Ok(Some(id))
            }
            Some(DeclaredId::Absolute {
                base,
                resource_type,
                id,
            }) => {
                if base_url != Some(base.as_str()) {
                    return Err(self.bad(format!("declared id has foreign base url '{base}'")));
                }
                if resource_type != self.doc.resource_type.as_str() {
                    return Err(self.bad(format!(
                        "declared id type '{resource_type}' does not match the body"
                    )));
                }
                let id = Uuid::parse_str(&id)
                    .map_err(|_| self.bad(format!("declared id '{id}' is not a valid id")))?;
                Ok(Some(id))
            }
        }
    }

    fn expected_version(&self) -> FolioResult<Option<u64>> {
        match &self.if_match {
            None => Ok(None),
            Some(raw) => parse_etag(raw)
                .map(Some)
                .ok_or_else(|| self.bad(format!("'{raw}' is not a valid if-match value"))),
        }
    }

    pub(crate) fn pre_execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        let base_url = ctx.config.base_url.as_deref();
        let declared = self.declared_persistent_id(base_url)?;
        self.expected_version()?;

        let target = match RequestTarget::parse(self.index, &self.url)? {
            RequestTarget::TypeId(resource_type, id) => {
                if resource_type != self.doc.resource_type {
                    return Err(self.bad(format!(
                        "target type '{resource_type}' does not match the body"
                    )));
                }
                if let Some(full_url) = &self.full_url {
                    if full_url.starts_with(TEMP_URN_PREFIX) {
                        return Err(
                            self.bad("update-by-id entries cannot use a temporary full-url")
                        );
                    }
                    let relative = format!("{resource_type}/{id}");
                    let matches_url = full_url == &relative
                        || base_url
                            .map(|b| format!("{}/{relative}", b.trim_end_matches('/')))
                            .is_some_and(|absolute| full_url == &absolute);
                    if !matches_url {
                        return Err(self.bad(format!(
                            "full-url '{full_url}' does not match the target '{relative}'"
                        )));
                    }
                }
                if let Some(declared) = declared {
                    if declared != id {
                        return Err(self.bad(format!(
                            "declared id '{declared}' does not match the target id '{id}'"
                        )));
                    }
                }
                self.mode = Some(Mode::ById);
                DocumentId::new(resource_type, id)
            }
            RequestTarget::TypeQuery(query) => {
                if query.resource_type != self.doc.resource_type {
                    return Err(self.bad(format!(
                        "criteria type '{}' does not match the body",
                        query.resource_type
                    )));
                }
                let target = match evaluate_condition(self.index, ctx.conn, &query)? {
                    ConditionMatch::None => match declared {
                        // update-as-create mints a fresh id
                        None => {
                            self.as_create = true;
                            DocumentId::fresh(self.doc.resource_type.clone())
                        }
                        Some(_) => {
                            return Err(FolioError::UpdateAsCreateNotAllowed {
                                resource_type: self.doc.resource_type.clone(),
                            });
                        }
                    },
                    ConditionMatch::One(found) => {
                        let id = found.id.ok_or_else(|| {
                            FolioError::Storage("stored document without id".into())
                        })?;
                        if let Some(declared) = declared {
                            if declared != id {
                                return Err(self.bad(format!(
                                    "declared id '{declared}' does not match the matched document"
                                )));
                            }
                        }
                        DocumentId::new(found.resource_type.clone(), id)
                    }
                    ConditionMatch::Many(_) => {
                        return Err(FolioError::ConditionalMatchAmbiguous {
                            resource_type: query.resource_type.clone(),
                            criteria: query.criteria(),
                        });
                    }
                };
                self.mode = Some(Mode::Conditional(query));
                target
            }
            RequestTarget::Type(_) | RequestTarget::TypeIdVersion(..) => {
                return Err(self.bad("updates target 'Type/{id}' or 'Type?criteria'"));
            }
        };

        if let Some(full_url) = &self.full_url {
            if parse_temp_urn(full_url).is_some() {
                ctx.ids
                    .register(full_url, target.clone())
                    .map_err(|_| self.bad(format!("duplicate full-url '{full_url}'")))?;
            }
        }
        self.target = Some(target);
        Ok(())
    }

    pub(crate) fn execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        let target = self
            .target
            .clone()
            .ok_or_else(|| FolioError::Storage("update executed before pre-execute".into()))?;

        // conditional updates re-check their match against current state
        if let Some(Mode::Conditional(query)) = &self.mode {
            match evaluate_condition(self.index, ctx.conn, query)? {
                ConditionMatch::None => self.as_create = true,
                ConditionMatch::One(found) => {
                    self.as_create = false;
                    let id = found
                        .id
                        .ok_or_else(|| FolioError::Storage("stored document without id".into()))?;
                    if id != target.id {
                        return Err(FolioError::ConditionalMatchAmbiguous {
                            resource_type: query.resource_type.clone(),
                            criteria: query.criteria(),
                        });
                    }
                }
                ConditionMatch::Many(_) => {
                    return Err(FolioError::ConditionalMatchAmbiguous {
                        resource_type: query.resource_type.clone(),
                        criteria: query.criteria(),
                    });
                }
            }
        }

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

        let updated = if self.as_create {
            ctx.gate.check_create_allowed(self.index, &self.doc)?;
            ctx.conn.create_with_id(&self.doc, target.id)?
        } else {
            let existing = ctx
                .conn
                .read(&target.resource_type, target.id)?
                .ok_or(FolioError::UpdateAsCreateNotAllowed {
                    resource_type: target.resource_type.clone(),
                })?;
            ctx.gate.check_update_allowed(self.index, &existing, &self.doc)?;
            ctx.conn.update(&self.doc, self.expected_version()?)?
        };
        debug!(
            target: "folio::cmd",
            index = self.index,
            location = ?updated.location(),
            as_create = self.as_create,
            "updated document"
        );
        self.updated = Some(updated);
        Ok(())
    }

    pub(crate) fn post_execute(&mut self, ctx: &mut PostContext<'_>) -> FolioResult<ResultEntry> {
        let updated = self
            .updated
            .take()
            .ok_or_else(|| FolioError::Storage("update finished without a document".into()))?;
        let code = if updated.version == 1 { 201 } else { 200 };
        if self.as_create {
            ctx.events.handle(Event::Created(updated.clone()));
        } else {
            ctx.events.handle(Event::Updated(updated.clone()));
        }
        let entry = ResultEntry::new(code).with_document_headers(&updated);
        Ok(match ctx.prefer_return {
            PreferReturn::Representation => entry.with_body(ResultBody::Resource(updated)),
            PreferReturn::OperationOutcome => entry.with_body(ResultBody::Outcome(
                OperationOutcome::information(if self.as_create { "created" } else { "updated" }),
            )),
            PreferReturn::Minimal => entry,
        })
    }
}
