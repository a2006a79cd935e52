//! Entry classification: bundle entries to commands
//!
//! Classification is pure and all-or-nothing: any malformed entry fails
//! the whole call before a single command runs.

use folio_core::document::Document;
use folio_core::error::{FolioError, FolioResult};
use folio_core::types::{BundleMode, ResourceType, Verb};
use serde_json::Value;
use tracing::debug;

use crate::command::{
    BatchCommandList, CheckReferencesCommand, Command, CreateCommand, DeleteCommand, ReadCommand,
    TransactionCommandList, UpdateCommand,
};
use crate::entry::{Bundle, BundleEntry};

/// Commands bundled under the mode that decides their execution
#[derive(Debug)]
pub enum CommandList {
    Batch(BatchCommandList),
    Transaction(TransactionCommandList),
}

fn malformed(index: usize, message: impl Into<String>) -> FolioError {
    FolioError::MalformedBundle {
        index,
        message: message.into(),
    }
}

/// Pull the declared resource type out of an entry body
fn body_resource_type(index: usize, body: &Value) -> FolioResult<ResourceType> {
    body.get("resourceType")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ResourceType::new)
        .ok_or_else(|| malformed(index, "body is missing its resourceType"))
}

fn classify(index: usize, entry: &BundleEntry, out: &mut Vec<Command>) -> FolioResult<()> {
    let verb = entry
        .request
        .verb
        .ok_or_else(|| malformed(index, "entry has no request verb"))?;

    match (&entry.resource, verb) {
        (None, Verb::Get) | (None, Verb::Head) => {
            out.push(Command::Read(ReadCommand::new(
                index,
                verb == Verb::Head,
                entry.request.url.clone(),
                entry.request.if_none_match.clone(),
                entry.request.if_modified_since,
            )));
        }
        (None, Verb::Delete) => {
            out.push(Command::Delete(DeleteCommand::new(
                index,
                entry.request.url.clone(),
            )));
        }
        (None, other) => {
            return Err(malformed(index, format!("{other} entries require a body")));
        }
        (Some(body), Verb::Post) => {
            let resource_type = body_resource_type(index, body)?;
            if entry.request.url != resource_type.as_str() {
                return Err(malformed(
                    index,
                    format!(
                        "create url '{}' must equal the resource type '{resource_type}'",
                        entry.request.url
                    ),
                ));
            }
            push_with_reference_check(
                index,
                Command::Create(CreateCommand::new(
                    index,
                    entry.full_url.clone(),
                    resource_type.clone(),
                    body.clone(),
                    entry.request.if_none_exist.clone(),
                )),
                resource_type,
                body,
                false,
                out,
            );
        }
        (Some(body), Verb::Put) => {
            let resource_type = body_resource_type(index, body)?;
            push_with_reference_check(
                index,
                Command::Update(UpdateCommand::new(
                    index,
                    entry.full_url.clone(),
                    entry.request.url.clone(),
                    resource_type.clone(),
                    body.clone(),
                    entry.request.if_match.clone(),
                )),
                resource_type,
                body,
                true,
                out,
            );
        }
        (Some(_), other) => {
            return Err(malformed(index, format!("{other} entries cannot carry a body")));
        }
    }
    Ok(())
}

fn push_with_reference_check(
    index: usize,
    command: Command,
    resource_type: ResourceType,
    body: &Value,
    tolerant: bool,
    out: &mut Vec<Command>,
) {
    out.push(command);
    if Document::new(resource_type.clone(), body.clone()).has_references() {
        out.push(Command::CheckReferences(CheckReferencesCommand::new(
            index,
            resource_type,
            body.clone(),
            tolerant,
        )));
    }
}

/// Classify every entry of a bundle into an executable command list
pub fn build_commands(bundle: &Bundle) -> FolioResult<CommandList> {
    let mut commands = Vec::with_capacity(bundle.entries.len());
    for (index, entry) in bundle.entries.iter().enumerate() {
        classify(index, entry, &mut commands)?;
    }
    debug!(
        target: "folio::cmd",
        mode = ?bundle.mode,
        entries = bundle.entries.len(),
        commands = commands.len(),
        "classified bundle"
    );
    Ok(match bundle.mode {
        BundleMode::Batch => CommandList::Batch(BatchCommandList::new(commands)),
        BundleMode::Transaction => CommandList::Transaction(TransactionCommandList::new(commands)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryRequest;
    use folio_core::types::temp_urn;
    use serde_json::json;
    use uuid::Uuid;

    fn entry(verb: Verb, url: &str, body: Option<Value>) -> BundleEntry {
        BundleEntry {
            full_url: body.is_some().then(|| temp_urn(Uuid::new_v4())),
            resource: body,
            request: EntryRequest {
                verb: Some(verb),
                url: url.to_string(),
                ..Default::default()
            },
        }
    }

    fn commands_of(mode: BundleMode, entries: Vec<BundleEntry>) -> Vec<&'static str> {
        let bundle = Bundle { mode, entries };
        let list = build_commands(&bundle).unwrap();
        let commands = match &list {
            CommandList::Batch(b) => b.commands(),
            CommandList::Transaction(t) => t.commands(),
        };
        commands.iter().map(Command::operation).collect()
    }

    #[test]
    fn test_classification() {
        let ops = commands_of(
            BundleMode::Batch,
            vec![
                entry(Verb::Get, "Patient/00000000-0000-0000-0000-000000000001", None),
                entry(Verb::Head, "Patient/00000000-0000-0000-0000-000000000001", None),
                entry(Verb::Post, "Patient", Some(json!({"resourceType": "Patient"}))),
                entry(
                    Verb::Put,
                    "Task/00000000-0000-0000-0000-000000000002",
                    Some(json!({
                        "resourceType": "Task",
                        "id": "00000000-0000-0000-0000-000000000002",
                    })),
                ),
                entry(Verb::Delete, "Patient?name=x", None),
            ],
        );
        assert_eq!(ops, vec!["read", "head", "create", "update", "delete"]);
    }

    #[test]
    fn test_reference_carrying_bodies_get_a_check_command() {
        let target = Uuid::new_v4();
        let ops = commands_of(
            BundleMode::Transaction,
            vec![entry(
                Verb::Post,
                "Task",
                Some(json!({
                    "resourceType": "Task",
                    "requester": {"reference": format!("Patient/{target}")},
                })),
            )],
        );
        assert_eq!(ops, vec!["create", "check-references"]);
    }

    #[test]
    fn test_malformed_entries_fail_the_whole_call() {
        let bundle = Bundle {
            mode: BundleMode::Batch,
            entries: vec![
                entry(Verb::Get, "Patient", None),
                entry(Verb::Post, "Patient", None),
            ],
        };
        match build_commands(&bundle).unwrap_err() {
            FolioError::MalformedBundle { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_create_url_must_match_body_type() {
        let bundle = Bundle {
            mode: BundleMode::Batch,
            entries: vec![entry(
                Verb::Post,
                "Task",
                Some(json!({"resourceType": "Patient"})),
            )],
        };
        assert!(build_commands(&bundle).is_err());
    }
}
