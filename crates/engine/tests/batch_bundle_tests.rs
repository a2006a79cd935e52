//! Batch bundle behavior: per-entry independence, error slots, and
//! search handling.

use std::sync::Arc;

use folio_core::document::Document;
use folio_core::error::FolioResult;
use folio_core::event::Event;
use folio_core::query::{Page, Query};
use folio_core::traits::{AuthorizationPolicy, DocumentStore, EventSink};
use folio_core::types::{BundleMode, Identity, PreferHandling, PreferReturn, ResourceType, Verb};
use folio_engine::entry::{Bundle, BundleEntry, EntryRequest};
use folio_engine::response::ResultBody;
use folio_engine::Engine;
use folio_store::MemoryStore;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn identity() -> Identity {
    Identity::new("tester")
}

fn urn() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

fn post(full_url: &str, url: &str, body: Value) -> BundleEntry {
    BundleEntry {
        full_url: Some(full_url.to_string()),
        resource: Some(body),
        request: EntryRequest {
            verb: Some(Verb::Post),
            url: url.to_string(),
            ..Default::default()
        },
    }
}

fn get(url: &str) -> BundleEntry {
    BundleEntry {
        full_url: None,
        resource: None,
        request: EntryRequest {
            verb: Some(Verb::Get),
            url: url.to_string(),
            ..Default::default()
        },
    }
}

fn batch(entries: Vec<BundleEntry>) -> Bundle {
    Bundle {
        mode: BundleMode::Batch,
        entries,
    }
}

fn seed(store: &MemoryStore, resource_type: &str, body: Value) -> Uuid {
    let id = Uuid::new_v4();
    let doc = Document::new(ResourceType::new(resource_type), body);
    store
        .connection()
        .create_with_id(&doc, id)
        .expect("seeding failed");
    id
}

fn count(store: &MemoryStore, resource_type: &str) -> usize {
    store
        .connection()
        .search(
            &Query::all(ResourceType::new(resource_type)),
            Page::default_count(100),
        )
        .unwrap()
        .total
}

// ============================================================================
// Independence
// ============================================================================

#[test]
fn a_failing_entry_leaves_the_other_entries_untouched() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone());
    let missing = Uuid::new_v4();

    let bundle = batch(vec![
        post(&urn(), "Patient", json!({"resourceType": "Patient"})),
        BundleEntry {
            full_url: None,
            resource: Some(json!({
                "resourceType": "Patient",
                "id": missing.to_string(),
            })),
            request: EntryRequest {
                verb: Some(Verb::Put),
                url: format!("Patient/{missing}"),
                ..Default::default()
            },
        },
        post(&urn(), "Patient", json!({"resourceType": "Patient"})),
    ]);
    let response = engine.execute_bundle(&bundle, &identity()).unwrap();

    assert_eq!(response.entries.len(), 3);
    assert_eq!(response.entries[0].status.code, 201);
    assert_eq!(response.entries[1].status.code, 405);
    assert_eq!(response.entries[2].status.code, 201);
    assert_eq!(count(&store, "Patient"), 2);
}

#[test]
fn an_entry_with_a_dangling_reference_rolls_back_only_itself() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone());

    let bundle = batch(vec![
        post(
            &urn(),
            "Task",
            json!({
                "resourceType": "Task",
                "requester": {"reference": format!("Patient/{}", Uuid::new_v4())},
            }),
        ),
        post(&urn(), "Patient", json!({"resourceType": "Patient"})),
    ]);
    let response = engine.execute_bundle(&bundle, &identity()).unwrap();

    // the create and its reference check share one slot and one rollback
    assert_eq!(response.entries[0].status.code, 422);
    assert_eq!(response.entries[1].status.code, 201);
    assert_eq!(count(&store, "Task"), 0);
    assert_eq!(count(&store, "Patient"), 1);
}

#[test]
fn later_entries_may_reference_earlier_batch_entries() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone());
    let patient_urn = urn();

    let bundle = batch(vec![
        post(&patient_urn, "Patient", json!({"resourceType": "Patient"})),
        post(
            &urn(),
            "Task",
            json!({
                "resourceType": "Task",
                "requester": {"reference": patient_urn},
            }),
        ),
    ]);
    let response = engine.execute_bundle(&bundle, &identity()).unwrap();
    assert_eq!(response.entries[0].status.code, 201);
    assert_eq!(response.entries[1].status.code, 201);
    assert_eq!(count(&store, "Task"), 1);
}

#[test]
fn an_early_read_of_a_later_entrys_temporary_id_is_a_miss_not_an_error() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone());
    let full_url = urn();

    let bundle = batch(vec![
        get(&full_url),
        post(&full_url, "Patient", json!({"resourceType": "Patient"})),
    ]);
    let response = engine.execute_bundle(&bundle, &identity()).unwrap();
    // the temporary id is registered before anything executes; the read
    // then runs first and finds no document written yet
    assert_eq!(response.entries[0].status.code, 404);
    assert_eq!(response.entries[1].status.code, 201);
    assert_eq!(count(&store, "Patient"), 1);
}

#[test]
fn reading_a_deleted_document_is_an_error_slot() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let id = seed(&store, "Patient", json!({"resourceType": "Patient"}));
    store
        .connection()
        .delete(&ResourceType::new("Patient"), id)
        .unwrap();
    let engine = Engine::new(store);

    let response = engine
        .execute_bundle(&batch(vec![get(&format!("Patient/{id}"))]), &identity())
        .unwrap();
    assert_eq!(response.entries[0].status.code, 410);
    assert!(matches!(
        response.entries[0].body,
        Some(ResultBody::Outcome(_))
    ));
}

// ============================================================================
// Events
// ============================================================================

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<Event>>,
}

impl EventSink for RecordingSink {
    fn handle_events(&self, events: Vec<Event>) -> FolioResult<()> {
        self.seen.lock().extend(events);
        Ok(())
    }
}

#[test]
fn successful_entries_deliver_events_even_when_others_fail() {
    init_tracing();
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store).with_event_sink(sink.clone());

    let bundle = batch(vec![
        post(&urn(), "Patient", json!({"resourceType": "Patient"})),
        post(
            &urn(),
            "Task",
            json!({
                "resourceType": "Task",
                "requester": {"reference": format!("Patient/{}", Uuid::new_v4())},
            }),
        ),
    ]);
    let response = engine.execute_bundle(&bundle, &identity()).unwrap();
    assert_eq!(response.entries[0].status.code, 201);
    assert_eq!(response.entries[1].status.code, 422);

    let seen = sink.seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], Event::Created(_)));
}

// ============================================================================
// Search
// ============================================================================

#[test]
fn search_pages_with_count_and_offset() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        seed(
            &store,
            "Patient",
            json!({"resourceType": "Patient", "name": format!("p{i}")}),
        );
    }
    let engine = Engine::new(store);

    let response = engine
        .execute_bundle(&batch(vec![get("Patient?_count=2&_offset=2")]), &identity())
        .unwrap();
    match response.entries[0].body.as_ref().unwrap() {
        ResultBody::SearchSet { total, matches, .. } => {
            assert_eq!(*total, 5);
            assert_eq!(matches.len(), 2);
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

#[test]
fn unsupported_search_parameters_are_stripped_when_lenient() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    seed(&store, "Patient", json!({"resourceType": "Patient"}));
    let engine = Engine::new(store);

    let response = engine
        .execute_bundle_with(
            &batch(vec![get("Patient?_sort=name")]),
            &identity(),
            PreferReturn::default(),
            PreferHandling::Lenient,
        )
        .unwrap();
    match response.entries[0].body.as_ref().unwrap() {
        ResultBody::SearchSet {
            total, warnings, ..
        } => {
            assert_eq!(*total, 1);
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("_sort"));
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

#[test]
fn unsupported_search_parameters_fail_the_slot_when_strict() {
    init_tracing();
    let engine = Engine::new(Arc::new(MemoryStore::new()));

    let response = engine
        .execute_bundle_with(
            &batch(vec![get("Patient?_sort=name")]),
            &identity(),
            PreferReturn::default(),
            PreferHandling::Strict,
        )
        .unwrap();
    assert_eq!(response.entries[0].status.code, 400);
}

#[test]
fn include_pulls_referenced_documents_into_the_result() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let patient = seed(&store, "Patient", json!({"resourceType": "Patient"}));
    seed(
        &store,
        "Task",
        json!({
            "resourceType": "Task",
            "requester": {"reference": format!("Patient/{patient}")},
        }),
    );
    let engine = Engine::new(store);

    let response = engine
        .execute_bundle(&batch(vec![get("Task?_include=requester")]), &identity())
        .unwrap();
    match response.entries[0].body.as_ref().unwrap() {
        ResultBody::SearchSet {
            matches, includes, ..
        } => {
            assert_eq!(matches.len(), 1);
            assert_eq!(includes.len(), 1);
            assert_eq!(includes[0].id, Some(patient));
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

// ============================================================================
// Authorization
// ============================================================================

struct ReadOnlyPolicy;

impl AuthorizationPolicy for ReadOnlyPolicy {
    fn reason_create_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
        None
    }
    fn reason_read_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
        Some("read-only role".to_string())
    }
    fn reason_update_allowed(&self, _: &Identity, _: &Document, _: &Document) -> Option<String> {
        None
    }
    fn reason_delete_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
        None
    }
    fn reason_search_allowed(&self, _: &Identity, _: &ResourceType) -> Option<String> {
        Some("read-only role".to_string())
    }
}

#[test]
fn a_denied_write_fails_only_its_own_slot() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let existing = seed(&store, "Patient", json!({"resourceType": "Patient"}));
    let engine = Engine::new(store.clone()).with_policy(Arc::new(ReadOnlyPolicy));

    let bundle = batch(vec![
        post(&urn(), "Patient", json!({"resourceType": "Patient"})),
        get(&format!("Patient/{existing}")),
    ]);
    let response = engine.execute_bundle(&bundle, &identity()).unwrap();
    assert_eq!(response.entries[0].status.code, 403);
    assert_eq!(response.entries[1].status.code, 200);
    assert_eq!(count(&store, "Patient"), 1);
}
