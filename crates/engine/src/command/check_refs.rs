//! Check-references command: verifies outbound references after writes
//!
//! Appended by the factory for every body-carrying entry with at least
//! one outbound reference. Runs after all writes of the bundle (its
//! priority sorts it behind delete/create/update) and confirms that
//! every reference resolves to a live target of the expected type.

use folio_core::document::{Document, RefValue};
use folio_core::error::{FolioError, FolioResult};
use folio_core::query::{Page, Query};
use folio_core::types::{temp_urn, ResourceType};
use tracing::debug;
use uuid::Uuid;

use crate::command::ExecContext;

#[derive(Debug)]
pub struct CheckReferencesCommand {
    pub index: usize,
    doc: Document,
    /// Update entries tolerate the pre-update version of a target
    /// pinned by a versioned reference
    tolerant: bool,
}

impl CheckReferencesCommand {
    pub(crate) fn new(
        index: usize,
        resource_type: ResourceType,
        body: serde_json::Value,
        tolerant: bool,
    ) -> Self {
        CheckReferencesCommand {
            index,
            doc: Document::new(resource_type, body),
            tolerant,
        }
    }

    fn unresolvable(&self, reference: impl Into<String>) -> FolioError {
        FolioError::ReferenceUnresolvable {
            index: self.index,
            reference: reference.into(),
        }
    }

    fn check_target_exists(
        &self,
        ctx: &ExecContext<'_>,
        resource_type: &ResourceType,
        id: Uuid,
        pinned_version: Option<u64>,
    ) -> FolioResult<()> {
        let reference = format!("{resource_type}/{id}");
        let current = match ctx.conn.read(resource_type, id) {
            Ok(Some(doc)) => doc,
            Ok(None) => return Err(self.unresolvable(&reference)),
            Err(FolioError::Gone { .. }) => return Err(self.unresolvable(&reference)),
            Err(other) => return Err(other),
        };
        if let Some(pinned) = pinned_version {
            let acceptable =
                current.version == pinned || (self.tolerant && current.version == pinned + 1);
            if !acceptable {
                return Err(self.unresolvable(format!(
                    "{reference}/_history/{pinned} (current version is {})",
                    current.version
                )));
            }
        }
        Ok(())
    }

    fn check_condition_unique(
        &self,
        ctx: &ExecContext<'_>,
        resource_type: &ResourceType,
        criteria: &str,
    ) -> FolioResult<()> {
        let query = Query::parse(resource_type.clone(), criteria);
        let result = ctx.conn.search(&query, Page::single())?;
        if result.total != 1 {
            return Err(self.unresolvable(format!(
                "{resource_type}?{criteria} matched {} documents",
                result.total
            )));
        }
        Ok(())
    }

    pub(crate) fn pre_execute(&mut self, _ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        Ok(())
    }

    pub(crate) fn execute(&mut self, ctx: &mut ExecContext<'_>) -> FolioResult<()> {
        for reference in self.doc.references() {
            match reference.value {
                RefValue::Temporary(temp) => {
                    let target = ctx
                        .ids
                        .resolve_temp(temp)
                        .cloned()
                        .ok_or_else(|| self.unresolvable(temp_urn(temp)))?;
                    self.check_target_exists(ctx, &target.resource_type, target.id, None)?;
                }
                RefValue::Literal {
                    resource_type,
                    id,
                    version,
                } => {
                    self.check_target_exists(ctx, &resource_type, id, version)?;
                }
                RefValue::Conditional {
                    resource_type,
                    criteria,
                } => {
                    self.check_condition_unique(ctx, &resource_type, &criteria)?;
                }
                RefValue::Logical {
                    resource_type,
                    system,
                    value,
                } => {
                    let criteria = format!("identifier={system}|{value}");
                    self.check_condition_unique(ctx, &resource_type, &criteria)?;
                }
                RefValue::Opaque(_) => {}
            }
        }
        debug!(
            target: "folio::cmd",
            index = self.index,
            "references verified"
        );
        Ok(())
    }
}
