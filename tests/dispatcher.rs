//! Batching, reference harvesting and outcome correlation against a fake server.

mod common;

use common::fake_server::FakeScimServer;
use common::{config, init_logging, target};
use scim_sync::protocol::ScimMethod;
use scim_sync::translator::ResourcePath;
use scim_sync::{
    BulkDispatcher, BulkId, CorrelationKey, EntityKind, EventId, IdTable, LocalGroup, LocalUser,
    OperationTranslator, Outcome, ResourceRef, ScimOperation, ServerCapabilities,
};

fn user_creates(translator: &OperationTranslator, count: usize) -> Vec<ScimOperation> {
    (0..count)
        .map(|i| {
            let user = LocalUser::new(format!("user{i}"));
            translator.user_upsert(&user, ResourceRef::Pending(CorrelationKey::user(&user.id)))
        })
        .collect()
}

fn group_with_members(
    translator: &OperationTranslator,
    group: &str,
    members: &[&str],
) -> Vec<ScimOperation> {
    let create = translator.group_upsert(
        &LocalGroup::new(group),
        ResourceRef::Pending(CorrelationKey::group(group)),
    );
    let patch = translator.members_patch(
        group,
        ResourceRef::Pending(CorrelationKey::group(group)),
        members
            .iter()
            .map(|member| ResourceRef::Pending(CorrelationKey::user(*member)))
            .collect(),
    );
    vec![create, patch]
}

#[tokio::test]
async fn test_independent_operations_use_ceil_n_over_m_requests() {
    init_logging();
    let fake = FakeScimServer::bulk(3);
    let server = target("bulk");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let operations = user_creates(&translator, 7);
    let report = BulkDispatcher::new(&fake)
        .dispatch(&server, operations, &ServerCapabilities::bulk(3), &mut ids)
        .await;

    assert_eq!(report.requests_sent(), 3);
    assert_eq!(fake.count(ScimMethod::Post, "/Bulk").await, 3);
    assert_eq!(report.succeeded(), 7);
    assert_eq!(fake.user_count().await, 7);
    assert!(ids.resolved_id(&CorrelationKey::user("user6")).is_some());
}

#[tokio::test]
async fn test_forward_references_resolved_within_one_chunk() {
    init_logging();
    let fake = FakeScimServer::bulk(10);
    let server = target("bulk");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let mut operations = user_creates(&translator, 2);
    operations.extend(group_with_members(&translator, "eng", &["user0", "user1"]));

    let report = BulkDispatcher::new(&fake)
        .dispatch(&server, operations, &ServerCapabilities::bulk(10), &mut ids)
        .await;

    assert_eq!(report.requests_sent(), 1);
    assert!(report.is_complete_success());
    assert_eq!(fake.member_external_ids("eng").await, vec!["user0", "user1"]);
}

#[tokio::test]
async fn test_ids_harvested_from_earlier_chunks_feed_later_ones() {
    init_logging();
    let fake = FakeScimServer::bulk(2);
    let server = target("bulk");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let mut operations = user_creates(&translator, 3);
    operations.extend(group_with_members(&translator, "eng", &["user0", "user2"]));

    let report = BulkDispatcher::new(&fake)
        .dispatch(&server, operations, &ServerCapabilities::bulk(2), &mut ids)
        .await;

    // Four creates in two chunks, then the member patch on its own.
    assert_eq!(report.requests_sent(), 3);
    assert!(report.is_complete_success(), "{:?}", report.outcomes().collect::<Vec<_>>());
    assert_eq!(fake.member_external_ids("eng").await, vec!["user0", "user2"]);

    let requests = fake.requests().await;
    let last = requests.last().and_then(|request| request.body.clone()).unwrap();
    let serialized = last.to_string();
    assert!(!serialized.contains("bulkId:"), "patch should carry real ids: {serialized}");
}

#[tokio::test]
async fn test_unknown_reference_fails_without_network_call() {
    init_logging();
    let fake = FakeScimServer::bulk(10);
    let server = target("bulk");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let operations = vec![translator.members_patch(
        "eng",
        ResourceRef::Pending(CorrelationKey::group("eng")),
        vec![ResourceRef::Pending(CorrelationKey::user("ghost"))],
    )];
    let report = BulkDispatcher::new(&fake)
        .dispatch(&server, operations, &ServerCapabilities::bulk(10), &mut ids)
        .await;

    assert_eq!(report.requests_sent(), 0);
    assert_eq!(fake.writes().await, 0);
    assert!(matches!(
        report.outcome(&BulkId::Members(CorrelationKey::group("eng"))),
        Some(Outcome::Failed { status: None, .. })
    ));
}

#[tokio::test]
async fn test_malformed_envelope_fails_whole_chunk() {
    init_logging();
    let fake = FakeScimServer::bulk(10).with_malformed_bulk();
    let server = target("broken");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let report = BulkDispatcher::new(&fake)
        .dispatch(
            &server,
            user_creates(&translator, 4),
            &ServerCapabilities::bulk(10),
            &mut ids,
        )
        .await;

    assert_eq!(report.failed(), 4);
    assert!(ids.is_empty());
}

#[tokio::test]
async fn test_one_failed_sub_operation_does_not_fail_siblings() {
    init_logging();
    let fake = FakeScimServer::bulk(10);
    let server = target("bulk");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let mut operations = user_creates(&translator, 2);
    // Replacing a resource the server never had yields a 404 sub-response.
    operations.push(translator.user_upsert(
        &LocalUser::new("stale"),
        ResourceRef::Resolved("u-404".to_string()),
    ));

    let report = BulkDispatcher::new(&fake)
        .dispatch(&server, operations, &ServerCapabilities::bulk(10), &mut ids)
        .await;

    assert_eq!(report.succeeded(), 2);
    assert!(matches!(
        report.outcome(&BulkId::Entity(CorrelationKey::user("stale"))),
        Some(Outcome::Failed { status: Some(404), .. })
    ));
}

fn delete_user(id: &str) -> ScimOperation {
    ScimOperation {
        method: ScimMethod::Delete,
        path: ResourcePath::resource(EntityKind::User, ResourceRef::Resolved(id.to_string())),
        body: None,
        bulk_id: BulkId::Event(EventId::new()),
    }
}

#[tokio::test]
async fn test_sub_responses_without_bulk_id_correlate_by_position() {
    init_logging();
    let fake = FakeScimServer::bulk(10).echoing_bulk_id_on_posts_only();
    let server = target("positional");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();
    let seeded = fake.seed_user("leaver").await;

    let gone = delete_user(&seeded);
    let missing = delete_user("u-404");
    let mut operations = user_creates(&translator, 1);
    operations.push(gone.clone());
    operations.push(missing.clone());
    operations.extend(group_with_members(&translator, "eng", &["user0"]));

    let report = BulkDispatcher::new(&fake)
        .dispatch(&server, operations, &ServerCapabilities::bulk(10), &mut ids)
        .await;

    assert_eq!(report.requests_sent(), 1);
    assert_eq!(fake.count(ScimMethod::Post, "/Bulk").await, 1);

    assert!(report.is_success(&BulkId::Entity(CorrelationKey::user("user0"))));
    assert_eq!(
        report.outcome(&gone.bulk_id),
        Some(&Outcome::Success { status: 204 })
    );
    assert!(matches!(
        report.outcome(&missing.bulk_id),
        Some(Outcome::Failed { status: Some(404), .. })
    ));
    assert!(report.is_success(&BulkId::Entity(CorrelationKey::group("eng"))));
    assert!(report.is_success(&BulkId::Members(CorrelationKey::group("eng"))));
    assert_eq!(report.failed(), 1);
    assert_eq!(fake.member_external_ids("eng").await, vec!["user0"]);
    assert_eq!(fake.user_count().await, 1);
}

#[tokio::test]
async fn test_sequential_server_gets_one_request_per_operation_in_order() {
    init_logging();
    let fake = FakeScimServer::sequential();
    let server = target("plain");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let mut operations = user_creates(&translator, 2);
    operations.extend(group_with_members(&translator, "eng", &["user1"]));

    let report = BulkDispatcher::new(&fake)
        .dispatch(
            &server,
            operations,
            &ServerCapabilities::sequential(),
            &mut ids,
        )
        .await;

    assert!(report.is_complete_success());
    assert_eq!(report.requests_sent(), 4);

    let methods: Vec<(ScimMethod, String)> = fake
        .requests()
        .await
        .into_iter()
        .map(|request| (request.method, request.path))
        .collect();
    let group_id = fake.group("eng").await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(
        methods,
        vec![
            (ScimMethod::Post, "/Users".to_string()),
            (ScimMethod::Post, "/Users".to_string()),
            (ScimMethod::Post, "/Groups".to_string()),
            (ScimMethod::Patch, format!("/Groups/{group_id}")),
        ]
    );
    assert_eq!(fake.member_external_ids("eng").await, vec!["user1"]);
}

#[tokio::test]
async fn test_bulk_flag_with_zero_limit_falls_back_to_sequential() {
    let fake = FakeScimServer::sequential();
    let server = target("odd");
    let translator = OperationTranslator::new(&config());
    let mut ids = IdTable::new();

    let capabilities = ServerCapabilities {
        bulk_supported: true,
        max_bulk_operations: 0,
        patch_supported: true,
    };
    let report = BulkDispatcher::new(&fake)
        .dispatch(&server, user_creates(&translator, 3), &capabilities, &mut ids)
        .await;

    assert_eq!(report.requests_sent(), 3);
    assert_eq!(fake.count(ScimMethod::Post, "/Bulk").await, 0);
}
