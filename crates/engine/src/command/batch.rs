//! Independent execution of a batch bundle
//!
//! Every phase runs over the whole bundle in submission order, so an
//! entry may name a later entry's temporary id and still find it in the
//! translation table. A failing entry turns into an error slot and is
//! skipped in later phases; the other entries are untouched. Mutating
//! entries still run atomically on their own: an entry whose reference
//! check fails rolls back that entry's write and nothing else.

use std::collections::{BTreeMap, BTreeSet};

use folio_core::error::{FolioError, FolioResult};
use folio_core::traits::Isolation;
use tracing::{info, warn};

use crate::command::{Command, ExecContext, PostContext};
use crate::response::{ResponseBundle, ResponseKind, ResultEntry};
use crate::BundleResources;

/// Commands of a batch bundle, in submission order
#[derive(Debug)]
pub struct BatchCommandList {
    commands: Vec<Command>,
}

impl BatchCommandList {
    pub fn new(commands: Vec<Command>) -> Self {
        BatchCommandList { commands }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Turn one entry's error into its response slot
    fn record_failure(
        resources: &BundleResources<'_>,
        results: &mut BTreeMap<usize, ResultEntry>,
        failed: &mut BTreeSet<usize>,
        index: usize,
        operation: &'static str,
        err: &FolioError,
    ) {
        warn!(
            target: "folio::txn",
            index,
            operation,
            %err,
            "batch entry failed"
        );
        info!(
            target: "folio::audit",
            index,
            identity = %resources.gate.identity(),
            operation,
            %err,
            "failed"
        );
        failed.insert(index);
        results.insert(index, ResultEntry::from_error(err));
    }

    /// Run the execute steps of one entry inside their own transaction
    /// scope
    fn execute_entry(
        group: &mut [Command],
        resources: &mut BundleResources<'_>,
    ) -> FolioResult<()> {
        let modifying = group.iter().any(Command::is_modifying);
        if modifying {
            resources.conn.begin(Isolation::ReadCommitted)?;
        }

        let staged = (|| -> FolioResult<()> {
            for command in group.iter_mut() {
                let mut ctx = ExecContext {
                    ids: &mut resources.ids,
                    conn: resources.conn.as_mut(),
                    validator: resources.validator,
                    gate: &resources.gate,
                    config: resources.config,
                    handling: resources.handling,
                };
                command.execute(&mut ctx)?;
            }
            Ok(())
        })();

        if let Err(err) = staged {
            if !resources.conn.auto_commit() {
                if let Err(rollback_err) = resources.conn.rollback() {
                    warn!(target: "folio::txn", %rollback_err, "rollback failed");
                }
            }
            return Err(err);
        }
        if modifying {
            resources.conn.commit()?;
        }
        Ok(())
    }

    /// Run every entry, collecting per-slot successes and failures
    pub(crate) fn execute(mut self, resources: &mut BundleResources<'_>) -> FolioResult<ResponseBundle> {
        let mut results: BTreeMap<usize, ResultEntry> = BTreeMap::new();
        let mut failed: BTreeSet<usize> = BTreeSet::new();

        // pre-execute pass over the whole bundle; every entry's
        // temporary id is registered before anything executes
        for i in 0..self.commands.len() {
            let command = &mut self.commands[i];
            let index = command.index();
            if failed.contains(&index) {
                continue;
            }
            let operation = command.operation();
            let mut ctx = ExecContext {
                ids: &mut resources.ids,
                conn: resources.conn.as_mut(),
                validator: resources.validator,
                gate: &resources.gate,
                config: resources.config,
                handling: resources.handling,
            };
            if let Err(err) = command.pre_execute(&mut ctx) {
                Self::record_failure(resources, &mut results, &mut failed, index, operation, &err);
            }
        }

        // execute pass, one mini-transaction per entry
        let mut start = 0;
        while start < self.commands.len() {
            let index = self.commands[start].index();
            let mut end = start + 1;
            while end < self.commands.len() && self.commands[end].index() == index {
                end += 1;
            }
            if !failed.contains(&index) {
                let operation = self.commands[start].operation();
                if let Err(err) = Self::execute_entry(&mut self.commands[start..end], resources) {
                    Self::record_failure(
                        resources,
                        &mut results,
                        &mut failed,
                        index,
                        operation,
                        &err,
                    );
                }
            }
            start = end;
        }

        // post-execute pass; the first result per entry index wins
        for i in 0..self.commands.len() {
            let command = &mut self.commands[i];
            let index = command.index();
            if failed.contains(&index) {
                continue;
            }
            let operation = command.operation();
            let mut ctx = PostContext {
                events: &mut resources.events,
                prefer_return: resources.prefer_return,
            };
            match command.post_execute(&mut ctx) {
                Ok(Some(entry)) => {
                    results.entry(index).or_insert(entry);
                }
                Ok(None) => {}
                Err(err) => {
                    results.remove(&index);
                    Self::record_failure(
                        resources,
                        &mut results,
                        &mut failed,
                        index,
                        operation,
                        &err,
                    );
                }
            }
        }

        let mut audited = BTreeSet::new();
        for command in &self.commands {
            let index = command.index();
            if failed.contains(&index) || !audited.insert(index) {
                continue;
            }
            info!(
                target: "folio::audit",
                index,
                identity = %resources.gate.identity(),
                operation = command.operation(),
                "completed"
            );
        }

        Ok(ResponseBundle {
            kind: ResponseKind::BatchResponse,
            entries: results.into_values().collect(),
        })
    }
}
