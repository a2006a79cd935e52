//! All-or-nothing execution of a transaction bundle

use std::collections::BTreeMap;

use folio_core::error::FolioResult;
use folio_core::traits::Isolation;
use tracing::{debug, info, warn};

use crate::command::{Command, ExecContext, PostContext};
use crate::response::{ResponseBundle, ResponseKind, ResultEntry};
use crate::BundleResources;

/// Commands of a transaction bundle, in execution order
///
/// Execution order is `(priority, index)`: deletes first, then creates,
/// updates, reference checks, and reads last. The response keeps entry
/// submission order regardless.
#[derive(Debug)]
pub struct TransactionCommandList {
    commands: Vec<Command>,
}

impl TransactionCommandList {
    pub fn new(mut commands: Vec<Command>) -> Self {
        commands.sort_by_key(|c| (c.priority(), c.index()));
        TransactionCommandList { commands }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Roll back and audit a failure at position `failed_pos` of the
    /// execution order
    ///
    /// The failing command gets a "failed" record; commands that had not
    /// yet reached the failing phase get an "aborted" record when their
    /// entry index is at or below the failing command's.
    fn abort(&self, resources: &mut BundleResources<'_>, failed_pos: usize) {
        if !resources.conn.auto_commit() {
            if let Err(err) = resources.conn.rollback() {
                warn!(target: "folio::txn", %err, "rollback failed");
            }
        }
        resources.events.discard();

        let failed = &self.commands[failed_pos];
        info!(
            target: "folio::audit",
            index = failed.index(),
            identity = %resources.gate.identity(),
            operation = failed.operation(),
            "failed"
        );
        for command in &self.commands[failed_pos + 1..] {
            if command.index() <= failed.index() {
                info!(
                    target: "folio::audit",
                    index = command.index(),
                    identity = %resources.gate.identity(),
                    operation = command.operation(),
                    "aborted"
                );
            }
        }
    }

    /// Run all commands; either every change commits or none does
    ///
    /// The storage transaction stays open through all three phases; it
    /// commits only once every post-execute has built its result entry.
    pub(crate) fn execute(mut self, resources: &mut BundleResources<'_>) -> FolioResult<ResponseBundle> {
        let modifying = self.commands.iter().any(Command::is_modifying);
        if modifying {
            resources.conn.begin(Isolation::RepeatableRead)?;
        }

        for pre in [true, false] {
            for i in 0..self.commands.len() {
                let command = &mut self.commands[i];
                let index = command.index();
                let operation = command.operation();
                let mut ctx = ExecContext {
                    ids: &mut resources.ids,
                    conn: resources.conn.as_mut(),
                    validator: resources.validator,
                    gate: &resources.gate,
                    config: resources.config,
                    handling: resources.handling,
                };
                let outcome = if pre {
                    command.pre_execute(&mut ctx)
                } else {
                    command.execute(&mut ctx)
                };
                if let Err(err) = outcome {
                    warn!(
                        target: "folio::txn",
                        index,
                        operation,
                        %err,
                        "transaction bundle failed"
                    );
                    self.abort(resources, i);
                    return Err(err);
                }
            }
        }

        let mut results: BTreeMap<usize, ResultEntry> = BTreeMap::new();
        for i in 0..self.commands.len() {
            let command = &mut self.commands[i];
            let index = command.index();
            let operation = command.operation();
            let mut ctx = PostContext {
                events: &mut resources.events,
                prefer_return: resources.prefer_return,
            };
            match command.post_execute(&mut ctx) {
                // first result per entry index wins
                Ok(Some(entry)) => {
                    results.entry(index).or_insert(entry);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        target: "folio::txn",
                        index,
                        operation,
                        %err,
                        "transaction bundle failed"
                    );
                    self.abort(resources, i);
                    return Err(err);
                }
            }
        }

        if modifying {
            if let Err(err) = resources.conn.commit() {
                warn!(target: "folio::txn", %err, "transaction commit failed");
                resources.events.discard();
                return Err(err);
            }
            debug!(target: "folio::txn", commands = self.commands.len(), "transaction committed");
        }

        for command in &self.commands {
            info!(
                target: "folio::audit",
                index = command.index(),
                identity = %resources.gate.identity(),
                operation = command.operation(),
                "completed"
            );
        }

        resources.events.commit_events();
        Ok(ResponseBundle {
            kind: ResponseKind::TransactionResponse,
            entries: results.into_values().collect(),
        })
    }
}
