//! End-to-end tests of the save orchestrator against the deterministic store.

use std::sync::Arc;

use studyalloc::AllocatorConfig;
use studyalloc::Eligibility;
use studyalloc::IdentifierOutcome;
use studyalloc::ReservationOutcome;
use studyalloc::SaveEvent;
use studyalloc::SaveOrchestrator;
use studyalloc::StepReport;
use studyalloc_store::EventId;
use studyalloc_store::GroupId;
use studyalloc_store::ProjectId;
use studyalloc_store::RecordKey;
use studyalloc_testing::DeterministicRecordStore;
use studyalloc_testing::StaticGroupDirectory;

const P: ProjectId = ProjectId(1);
const POOL: ProjectId = ProjectId(77);
const RAND: EventId = EventId(41);
const ENROLL: EventId = EventId(40);
const POOL_EVENT: EventId = EventId(900);

const DUKE: GroupId = GroupId(105);
const COORDINATING: GroupId = GroupId(200);

const CONFIG: &str = r#"
random-result-event = 41
random-result-field = "rand_group"
study-name-field = "study_id"
study-name-event = 40
pharma-alias-field = "pharma_alias"
pharma-alias-event = 41
pharma-alias-pid = 77
"#;

type Orchestrator = SaveOrchestrator<DeterministicRecordStore, StaticGroupDirectory>;

struct Harness {
    store: Arc<DeterministicRecordStore>,
    orchestrator: Orchestrator,
}

async fn harness() -> Harness {
    let store = DeterministicRecordStore::new();
    store.create_project(P).await;
    for (entry, code, group) in [("1", "PX-100", "1"), ("2", "PX-200", "2"), ("3", "PX-101", "1")] {
        store
            .insert_row(POOL, entry, POOL_EVENT, &[("code", code), ("group", group), ("used_by", "")])
            .await;
    }

    let directory = StaticGroupDirectory::new()
        .with_group(P, DUKE, "05_duke")
        .with_group(P, COORDINATING, "coordinating_center")
        .into_arc();
    let config = AllocatorConfig::from_toml_str(CONFIG).unwrap();
    let orchestrator = SaveOrchestrator::try_new(store.clone(), directory, &config).unwrap();
    Harness { store, orchestrator }
}

fn save(record: &str, group: Option<GroupId>) -> SaveEvent {
    SaveEvent {
        project: P,
        record: RecordKey::from(record),
        instrument: Some("randomization".into()),
        event: RAND,
        group,
        repeat_instance: None,
    }
}

#[tokio::test]
async fn test_randomized_save_assigns_both() {
    let h = harness().await;
    h.store.set_value(P, "17", RAND, "rand_group", "1").await;

    let report = h.orchestrator.on_record_saved(save("17", Some(DUKE))).await;

    assert!(report.is_complete());
    assert_eq!(
        report.identifier,
        Some(StepReport::Completed(IdentifierOutcome::Assigned {
            identifier: "R5-001".into()
        }))
    );
    assert_eq!(
        report.alias,
        Some(StepReport::Completed(ReservationOutcome::Reserved {
            code: "PX-100".into(),
            entry: RecordKey::from("1"),
        }))
    );
    assert_eq!(h.store.value(P, "17", ENROLL, "study_id").await, "R5-001");
    assert_eq!(h.store.value(P, "17", RAND, "pharma_alias").await, "PX-100");
    assert_eq!(h.store.value(POOL, "1", POOL_EVENT, "used_by").await, "17");
    assert_eq!(h.store.value(POOL, "1", POOL_EVENT, "codebook_complete").await, "2");
}

#[tokio::test]
async fn test_pool_group_follows_randomization_result() {
    let h = harness().await;
    h.store.set_value(P, "18", RAND, "rand_group", "2").await;

    let report = h.orchestrator.on_record_saved(save("18", None)).await;
    assert_eq!(h.store.value(P, "18", RAND, "pharma_alias").await, "PX-200");
    assert_eq!(h.store.value(P, "18", ENROLL, "study_id").await, "R-001");
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_empty_trigger_performs_no_writes() {
    let h = harness().await;
    h.store.set_value(P, "19", RAND, "rand_group", " ").await;
    let writes_before = h.store.write_count();

    let report = h.orchestrator.on_record_saved(save("19", Some(DUKE))).await;
    assert_eq!(report.gate, StepReport::Completed(Eligibility::NotYetEligible));
    assert!(report.identifier.is_none());
    assert!(report.alias.is_none());
    assert_eq!(h.store.write_count(), writes_before);
}

#[tokio::test]
async fn test_resave_is_idempotent() {
    let h = harness().await;
    h.store.set_value(P, "17", RAND, "rand_group", "1").await;

    h.orchestrator.on_record_saved(save("17", Some(DUKE))).await;
    let writes_after_first = h.store.write_count();

    let report = h.orchestrator.on_record_saved(save("17", Some(DUKE))).await;
    assert_eq!(h.store.write_count(), writes_after_first);
    assert_eq!(
        report.identifier,
        Some(StepReport::Completed(IdentifierOutcome::AlreadyAssigned {
            existing: "R5-001".into()
        }))
    );
    assert_eq!(
        report.alias,
        Some(StepReport::Completed(ReservationOutcome::AlreadyAssigned {
            existing: "PX-100".into()
        }))
    );
    // Second free entry of the group is untouched.
    assert_eq!(h.store.value(POOL, "3", POOL_EVENT, "used_by").await, "");
}

#[tokio::test]
async fn test_sequential_saves_increment_per_site() {
    let h = harness().await;
    for record in ["20", "21"] {
        h.store.set_value(P, record, RAND, "rand_group", "1").await;
        h.orchestrator.on_record_saved(save(record, Some(DUKE))).await;
    }
    h.store.set_value(P, "22", RAND, "rand_group", "1").await;
    h.orchestrator.on_record_saved(save("22", None)).await;

    assert_eq!(h.store.value(P, "20", ENROLL, "study_id").await, "R5-001");
    assert_eq!(h.store.value(P, "21", ENROLL, "study_id").await, "R5-002");
    assert_eq!(h.store.value(P, "22", ENROLL, "study_id").await, "R-001");
}

#[tokio::test]
async fn test_unresolved_group_still_reserves_alias() {
    let h = harness().await;
    h.store.set_value(P, "23", RAND, "rand_group", "1").await;

    let report = h.orchestrator.on_record_saved(save("23", Some(COORDINATING))).await;

    match report.identifier {
        Some(StepReport::Failed { ref kind, .. }) => assert_eq!(kind, "unresolved_group"),
        ref other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(
        report.alias,
        Some(StepReport::Completed(ReservationOutcome::Reserved { .. }))
    ));
    assert_eq!(h.store.value(P, "23", ENROLL, "study_id").await, "");
    assert!(!report.is_complete());
    assert_eq!(h.store.audit_events().await.len(), 1);
}

#[tokio::test]
async fn test_exhausted_pool_still_assigns_identifier() {
    let h = harness().await;
    h.store.set_value(P, "24", RAND, "rand_group", "3").await;

    let report = h.orchestrator.on_record_saved(save("24", Some(DUKE))).await;

    assert_eq!(
        report.alias,
        Some(StepReport::Completed(ReservationOutcome::Exhausted { group: "3".into() }))
    );
    assert_eq!(h.store.value(P, "24", ENROLL, "study_id").await, "R5-001");

    let events = h.store.audit_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].record, Some(RecordKey::from("24")));
    assert!(events[0].detail.contains("[group] = '3'"));
}

#[tokio::test]
async fn test_alias_write_failure_is_partial_commit() {
    let h = harness().await;
    h.store.set_value(P, "25", RAND, "rand_group", "1").await;
    h.store.reject_writes_to("pharma_alias").await;

    let report = h.orchestrator.on_record_saved(save("25", Some(DUKE))).await;

    match report.alias {
        Some(StepReport::Failed { ref kind, ref message }) => {
            assert_eq!(kind, "partial_commit");
            assert!(message.contains("PX-100"));
        }
        ref other => panic!("expected partial commit, got {other:?}"),
    }
    assert_eq!(h.store.value(POOL, "1", POOL_EVENT, "used_by").await, "25");
    assert_eq!(h.store.value(P, "25", ENROLL, "study_id").await, "R5-001");
}

#[tokio::test]
async fn test_report_serializes_for_operators() {
    let h = harness().await;
    h.store.set_value(P, "26", RAND, "rand_group", "1").await;

    let report = h.orchestrator.on_record_saved(save("26", Some(DUKE))).await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["record"], "26");
    assert_eq!(json["gate"]["value"]["state"], "eligible");
    assert_eq!(json["identifier"]["value"]["status"], "assigned");
    assert_eq!(json["identifier"]["value"]["identifier"], "R5-001");
    assert_eq!(json["alias"]["value"]["status"], "reserved");
    assert_eq!(json["alias"]["value"]["code"], "PX-100");
}
