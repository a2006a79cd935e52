//! Read command: GET and HEAD entries, by id, by version, or by query

use chrono::{DateTime, Utc};
use folio_core::document::Document;
use folio_core::error::{FolioError, FolioResult};
use folio_core::query::{Page, Query};
use folio_core::types::{PreferHandling, ResourceType, TEMP_URN_PREFIX};
use tracing::debug;
use uuid::Uuid;

use crate::command::{ExecContext, PostContext};
use crate::entry::{parse_etag, RequestTarget};
use crate::response::{OperationOutcome, ResultBody, ResultEntry};

#[derive(Debug)]
enum Outcome {
    Found(Document),
    NotModified(Document),
    Missing(ResourceType, Uuid),
    Search {
        total: usize,
        matches: Vec<Document>,
        includes: Vec<Document>,
        warnings: Vec<String>,
    },
}

#[derive(Debug)]
pub struct ReadCommand {
    pub index: usize,
    /// HEAD semantics: identical to GET, result never carries a body
    pub head: bool,
    url: String,
    if_none_match: Option<String>,
    if_modified_since: Option<DateTime<Utc>>,
    outcome: Option<Outcome>,
}

impl ReadCommand {
    pub(crate) fn new(
        index: usize,
        head: bool,
        url: String,
        if_none_match: Option<String>,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Self {
        ReadCommand {
            index,
            head,
            url,
            if_none_match,
            if_modified_since,
            outcome: None,
        }
    }

    fn bad(&self, message: impl Into<String>) -> FolioError {
        FolioError::BadRequest {
            index: self.index,
            message: message.into(),
        }
    }

    pub(crate) fn pre_execute(&mut self, _ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        Ok(())
    }

    /// Precondition headers turn a hit into `304 Not Modified`
    fn not_modified(&self, doc: &Document) -> bool {
        if let Some(raw) = &self.if_none_match {
            if parse_etag(raw) == Some(doc.version) {
                return true;
            }
        }
        if let (Some(since), Some(last_updated)) = (self.if_modified_since, doc.last_updated) {
            if last_updated <= since {
                return true;
            }
        }
        false
    }

    fn read_one(
        &mut self,
        ctx: &mut ExecContext<'_>,
        resource_type: ResourceType,
        id: Uuid,
        version: Option<u64>,
    ) -> FolioResult<()> {
        let found = match version {
            None => ctx.conn.read(&resource_type, id)?,
            Some(v) => ctx.conn.read_version(&resource_type, id, v)?,
        };
        let Some(doc) = found else {
            // a missing document fails this slot, not the bundle
            self.outcome = Some(Outcome::Missing(resource_type, id));
            return Ok(());
        };
        ctx.gate.check_read_allowed(self.index, &doc)?;
        self.outcome = Some(if self.not_modified(&doc) {
            Outcome::NotModified(doc)
        } else {
            Outcome::Found(doc)
        });
        Ok(())
    }

    fn search(&mut self, ctx: &mut ExecContext<'_>, mut query: Query) -> FolioResult<()> {
        ctx.gate
            .check_search_allowed(self.index, &query.resource_type)?;

        let mut warnings = Vec::new();
        let page = self.extract_page(ctx, &mut query, &mut warnings)?;

        let unsupported = ctx.conn.unsupported_parameters(&query);
        if !unsupported.is_empty() {
            match ctx.handling {
                PreferHandling::Strict => {
                    return Err(self.bad(format!(
                        "unsupported search parameters: {}",
                        unsupported.join(", ")
                    )));
                }
                PreferHandling::Lenient => {
                    let names: Vec<&str> = unsupported.iter().map(String::as_str).collect();
                    query.strip_parameters(&names);
                    for name in unsupported {
                        warnings.push(format!("search parameter '{name}' was ignored"));
                    }
                }
            }
        }

        let result = ctx.conn.search(&query, page)?;
        let includes = result
            .includes
            .into_iter()
            .filter(|doc| ctx.gate.may_read(doc))
            .collect();
        debug!(
            target: "folio::cmd",
            index = self.index,
            total = result.total,
            "search executed"
        );
        self.outcome = Some(Outcome::Search {
            total: result.total,
            matches: result.matches,
            includes,
            warnings,
        });
        Ok(())
    }

    /// Pull `_count`/`_offset` out of the query; they are interpreted
    /// here, not by the store
    fn extract_page(
        &self,
        ctx: &ExecContext<'_>,
        query: &mut Query,
        warnings: &mut Vec<String>,
    ) -> FolioResult<Page> {
        let mut page = Page::default_count(ctx.config.default_page_count);
        for (name, value) in query.strip_parameters(&["_count", "_offset"]) {
            match (name.as_str(), value.parse::<usize>()) {
                ("_count", Ok(count)) => page.count = count,
                ("_offset", Ok(offset)) => page.offset = offset,
                (_, Err(_)) => match ctx.handling {
                    PreferHandling::Strict => {
                        return Err(
                            self.bad(format!("'{value}' is not a valid value for {name}"))
                        );
                    }
                    PreferHandling::Lenient => {
                        warnings.push(format!("paging parameter '{name}={value}' was ignored"));
                    }
                },
                _ => {}
            }
        }
        Ok(page)
    }

    pub(crate) fn execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        // request urls naming another entry's temporary id read the
        // document that entry produced
        let url = if self.url.starts_with(TEMP_URN_PREFIX) {
            let id = ctx
                .ids
                .get(&self.url)
                .ok_or_else(|| self.bad(format!("unresolved temporary url '{}'", self.url)))?;
            id.relative_url()
        } else {
            self.url.clone()
        };

        match RequestTarget::parse(self.index, &url)? {
            RequestTarget::Type(resource_type) => self.search(ctx, Query::all(resource_type)),
            RequestTarget::TypeId(resource_type, id) => self.read_one(ctx, resource_type, id, None),
            RequestTarget::TypeIdVersion(resource_type, id, version) => {
                self.read_one(ctx, resource_type, id, Some(version))
            }
            RequestTarget::TypeQuery(query) => self.search(ctx, query),
        }
    }

    pub(crate) fn post_execute(&mut self, _ctx: &mut PostContext<'_>) -> FolioResult<ResultEntry> {
        let outcome = self
            .outcome
            .take()
            .ok_or_else(|| FolioError::Storage("read finished without a result".into()))?;
        Ok(match outcome {
            Outcome::Found(doc) => {
                let entry = ResultEntry::new(200).with_document_headers(&doc);
                if self.head {
                    entry
                } else {
                    entry.with_body(ResultBody::Resource(doc))
                }
            }
            Outcome::NotModified(doc) => ResultEntry::new(304).with_document_headers(&doc),
            Outcome::Missing(resource_type, id) => {
                let entry = ResultEntry::new(404);
                if self.head {
                    entry
                } else {
                    entry.with_body(ResultBody::Outcome(OperationOutcome::error(format!(
                        "{resource_type}/{id} not found"
                    ))))
                }
            }
            Outcome::Search {
                total,
                matches,
                includes,
                warnings,
            } => {
                let entry = ResultEntry::new(200);
                if self.head {
                    entry
                } else {
                    entry.with_body(ResultBody::SearchSet {
                        total,
                        matches,
                        includes,
                        warnings,
                    })
                }
            }
        })
    }
}
