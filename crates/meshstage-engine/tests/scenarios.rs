//! # End-to-End Reconciliation Scenarios
//!
//! Drives the engine through the scripted in-memory backend: sweeps over
//! several runs, stage transitions with slow deletions, and the bounded
//! listing retry.

use meshstage_core::{
    GrantStatus, MemberResource, OutcomeStatus, ResourceKind, ResourceRef, StageName, TagChangeEvent,
};
use meshstage_engine::fake::FakeBackend;
use meshstage_engine::{
    EngineConfig, EngineContext, EngineError, MembershipConvergence, Reconciler, StageRegistryResolver,
    StageTransition, StaleMembershipPruner, TransitionOutcome,
};
use meshstage_store::{MemoryConfigStore, StageStateStore};
use std::collections::BTreeMap;
use std::sync::Arc;

const LOCAL: &str = "111122223333";
const SENDER: &str = "444455556666";
const VPC: &str = "vpc-0abc";

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.policy.local_account = LOCAL.to_string();
    config.policy.stage_names = vec!["alpha".into(), "beta".into(), "prod".into()];
    config.policy.allowed_accounts = vec!["ALL".into()];
    config
}

fn engine(fake: &Arc<FakeBackend>) -> EngineContext {
    let config = config();
    let state = StageStateStore::new(
        Arc::new(MemoryConfigStore::new()),
        config.store.registry_key.clone(),
        config.store.pointer_prefix.clone(),
    );
    EngineContext::new(config, fake.clone(), fake.clone(), state).expect("valid config")
}

fn stage_networks() -> Arc<FakeBackend> {
    let fake = Arc::new(FakeBackend::new(LOCAL));
    fake.add_stage_network("sn-a", "alpha", LOCAL);
    fake.add_stage_network("sn-b", "beta", LOCAL);
    fake.add_stage_network("sn-p", "prod", LOCAL);
    fake
}

fn service(id: &str) -> MemberResource {
    MemberResource {
        id: id.to_string(),
        arn: format!("arn:aws:vpc-lattice:eu-west-1:{}:service/{}", SENDER, id),
        kind: ResourceKind::Service,
    }
}

fn vpc_event(stage: Option<&str>) -> TagChangeEvent {
    let labels = stage
        .map(|s| BTreeMap::from([("stage".to_string(), s.to_string())]))
        .unwrap_or_default();
    TagChangeEvent::from_labels(ResourceRef::from_id(VPC), labels).expect("valid event")
}

fn stage(name: &str) -> StageName {
    StageName::parse(name).expect("valid stage")
}

// ── Sweeps ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_sweeps_converge_once() {
    let fake = stage_networks();
    let invitation = fake.invite("inv-1", "beta", SENDER);
    fake.share_resource(&invitation.grant_arn, service("svc-1"));
    fake.share_resource(&invitation.grant_arn, service("svc-2"));
    let reconciler = Reconciler::new(engine(&fake));

    let first = reconciler.sweep().await;
    assert_eq!(first.status, OutcomeStatus::Succeeded);
    assert_eq!(fake.calls("create_association"), 2);

    let second = reconciler.sweep().await;
    assert_eq!(second.status, OutcomeStatus::Succeeded);
    assert_eq!(
        second.phase("converge_membership").map(|p| p.status),
        Some(OutcomeStatus::NoOp)
    );
    assert_eq!(fake.calls("create_association"), 2);
    assert_eq!(fake.live_associations("svc-1").len(), 1);
    assert_eq!(fake.live_associations("svc-2").len(), 1);
}

#[tokio::test]
async fn revoked_grant_is_pruned_on_next_sweep() {
    let fake = stage_networks();
    let kept = fake.add_inbound_grant("alpha", SENDER, GrantStatus::Active);
    fake.share_resource(&kept, service("svc-kept"));
    let revoked = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
    fake.share_resource(&revoked, service("svc-revoked"));
    let reconciler = Reconciler::new(engine(&fake));

    reconciler.sweep().await;
    assert_eq!(fake.live_associations("svc-revoked").len(), 1);

    fake.set_grant_status(&revoked, GrantStatus::Deleted);
    let report = reconciler.sweep().await;

    assert_eq!(
        report.phase("prune_memberships").map(|p| p.processed.len()),
        Some(1)
    );
    assert!(fake.live_associations("svc-revoked").is_empty());
    assert_eq!(fake.live_associations("svc-kept").len(), 1);
}

#[tokio::test]
async fn shared_networks_never_become_members() {
    let fake = stage_networks();
    let grant = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
    fake.share_resource(&grant, service("svc-1"));
    fake.share_resource(
        &grant,
        MemberResource {
            id: "vpc-shared".to_string(),
            arn: format!("arn:aws:ec2:eu-west-1:{}:vpc/vpc-shared", SENDER),
            kind: ResourceKind::VirtualNetwork,
        },
    );
    let reconciler = Reconciler::new(engine(&fake));

    reconciler.sweep().await;
    assert_eq!(fake.live_associations("svc-1").len(), 1);
    assert!(fake.live_associations("vpc-shared").is_empty());

    fake.set_grant_status(&grant, GrantStatus::Deleted);
    reconciler.sweep().await;

    assert!(fake.associations().iter().all(|a| !a.state.is_live()));
}

#[tokio::test]
async fn pruner_only_removes_orphans() {
    let fake = stage_networks();
    let grant = fake.add_inbound_grant("prod", SENDER, GrantStatus::Active);
    fake.share_resource(&grant, service("svc-live"));
    fake.add_association("svc-live", "sn-p", ResourceKind::Service);
    fake.add_association("svc-orphan-1", "sn-p", ResourceKind::Service);
    fake.add_association("svc-orphan-2", "sn-a", ResourceKind::Service);
    fake.add_association(VPC, "sn-a", ResourceKind::VirtualNetwork);

    let ctx = engine(&fake);
    StageRegistryResolver::new(&ctx).run().await.expect("resolve");
    let outcome = StaleMembershipPruner::new(&ctx).run().await.expect("prune");

    assert_eq!(outcome.processed.len(), 2);
    assert!(fake.live_associations("svc-orphan-1").is_empty());
    assert!(fake.live_associations("svc-orphan-2").is_empty());
    assert_eq!(fake.live_associations("svc-live").len(), 1);
    assert_eq!(fake.live_associations(VPC).len(), 1);
}

#[tokio::test]
async fn registry_reflects_latest_listing() {
    let fake = Arc::new(FakeBackend::new(LOCAL));
    fake.add_stage_network("sn-a", "alpha", LOCAL);
    let ctx = engine(&fake);

    StageRegistryResolver::new(&ctx).run().await.expect("first resolve");
    let registry = ctx.state.load_registry().await.expect("load");
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.network_for(&stage("prod")), None);

    fake.add_stage_network("sn-p", "prod", LOCAL);
    fake.add_stage_network("sn-p2", "prod", LOCAL);
    StageRegistryResolver::new(&ctx).run().await.expect("second resolve");

    let registry = ctx.state.load_registry().await.expect("load");
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.network_for(&stage("prod")), Some("sn-p"));
}

// ── Bounded Listing Retry ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn convergence_survives_slow_directory() {
    let fake = stage_networks();
    let grant = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
    fake.share_resource(&grant, service("svc-late"));
    fake.script_empty_resource_listings(4);

    let ctx = engine(&fake);
    StageRegistryResolver::new(&ctx).run().await.expect("resolve");
    let outcome = MembershipConvergence::new(&ctx).run().await.expect("converge");

    assert_eq!(outcome.processed, vec!["svc-late".to_string()]);
    assert_eq!(fake.calls("list_resources"), 5);
    assert_eq!(fake.live_associations("svc-late").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn convergence_gives_up_quietly() {
    let fake = stage_networks();
    let grant = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
    fake.share_resource(&grant, service("svc-late"));
    fake.script_empty_resource_listings(5);

    let ctx = engine(&fake);
    StageRegistryResolver::new(&ctx).run().await.expect("resolve");
    let outcome = MembershipConvergence::new(&ctx).run().await.expect("converge");

    assert_eq!(outcome.status, OutcomeStatus::NoOp);
    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.failures.is_empty());
    assert_eq!(fake.calls("create_association"), 0);

    // The directory has caught up by the next run.
    let outcome = MembershipConvergence::new(&ctx).run().await.expect("converge");
    assert_eq!(outcome.processed, vec!["svc-late".to_string()]);
}

// ── Stage Transitions ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transitions_keep_single_membership() {
    let fake = stage_networks();
    let ctx = engine(&fake);
    StageRegistryResolver::new(&ctx).run().await.expect("resolve");
    let transition = StageTransition::new(&ctx);

    for (name, network) in [("alpha", "sn-a"), ("beta", "sn-b"), ("prod", "sn-p"), ("alpha", "sn-a")] {
        transition.apply(&vpc_event(Some(name))).await.expect("transition");

        let live = fake.live_associations(VPC);
        assert_eq!(live.len(), 1, "after moving to {}", name);
        assert_eq!(live[0].network_id, network);
        assert_eq!(
            ctx.state.load_current_stage(VPC).await.expect("pointer").stage,
            Some(stage(name))
        );
    }
}

#[tokio::test(start_paused = true)]
async fn fresh_assignment_attaches_and_records_stage() {
    let fake = stage_networks();
    let ctx = engine(&fake);
    StageRegistryResolver::new(&ctx).run().await.expect("resolve");

    let result = StageTransition::new(&ctx)
        .apply(&vpc_event(Some("alpha")))
        .await
        .expect("assign");

    match result {
        TransitionOutcome::Assigned { stage: assigned, removed, .. } => {
            assert_eq!(assigned, stage("alpha"));
            assert!(removed.is_empty());
        }
        other => panic!("expected Assigned, got {:?}", other),
    }
    assert_eq!(fake.calls("delete_association"), 0);
    let pointer = ctx.state.load_current_stage(VPC).await.expect("pointer");
    assert_eq!(pointer.stage, Some(stage("alpha")));

    let associations = fake.associations();
    let replay = StageTransition::new(&ctx)
        .apply(&vpc_event(Some("alpha")))
        .await
        .expect("replay");

    assert_eq!(replay, TransitionOutcome::AlreadyAssociated { stage: stage("alpha") });
    assert_eq!(fake.associations(), associations);
    assert_eq!(fake.calls("create_association"), 1);
    assert_eq!(fake.calls("delete_association"), 0);
    assert_eq!(ctx.state.load_current_stage(VPC).await.expect("pointer"), pointer);
}

#[tokio::test(start_paused = true)]
async fn relabel_waits_for_slow_deletion() {
    let fake = stage_networks();
    let ctx = engine(&fake);
    StageRegistryResolver::new(&ctx).run().await.expect("resolve");
    let transition = StageTransition::new(&ctx);
    transition.apply(&vpc_event(Some("alpha"))).await.expect("assign alpha");

    fake.set_deletion_polls(Some(3));
    let result = transition.apply(&vpc_event(Some("beta"))).await.expect("move to beta");

    assert!(matches!(result, TransitionOutcome::Assigned { ref removed, .. } if removed.len() == 1));
    assert_eq!(fake.calls("get_association"), 3);
    let live = fake.live_associations(VPC);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].network_id, "sn-b");
}

#[tokio::test(start_paused = true)]
async fn stuck_deletion_aborts_before_attach() {
    let fake = stage_networks();
    let ctx = engine(&fake);
    StageRegistryResolver::new(&ctx).run().await.expect("resolve");
    let transition = StageTransition::new(&ctx);
    transition.apply(&vpc_event(Some("alpha"))).await.expect("assign alpha");

    fake.set_deletion_polls(None);
    let err = transition.apply(&vpc_event(Some("beta"))).await.unwrap_err();

    assert!(matches!(err, EngineError::DeletionTimeout { .. }));
    assert_eq!(fake.calls("create_association"), 1);
    assert!(fake
        .associations()
        .iter()
        .all(|a| a.network_id != "sn-b"));
    assert_eq!(
        ctx.state.load_current_stage(VPC).await.expect("pointer").stage,
        Some(stage("alpha"))
    );
}

#[tokio::test(start_paused = true)]
async fn notification_drives_transition() {
    let fake = stage_networks();
    let reconciler = Reconciler::new(engine(&fake));
    reconciler.resolve_registry().await.expect("resolve");

    let raw = serde_json::json!({
        "detail": {
            "eventName": "CreateTags",
            "requestParameters": {
                "resourcesSet": { "items": [{ "resourceId": VPC }] },
                "tagSet": { "items": [{ "key": "Stage", "value": "Prod" }] }
            }
        }
    });
    let outcome = reconciler.handle_notification(&raw).await;
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(fake.live_associations(VPC)[0].network_id, "sn-p");

    let raw = serde_json::json!({
        "detail": {
            "eventName": "DeleteTags",
            "requestParameters": {
                "resourcesSet": { "items": [{ "resourceId": VPC }] },
                "tagSet": { "items": [{ "key": "Stage" }] }
            }
        }
    });
    let outcome = reconciler.handle_notification(&raw).await;
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert!(fake.live_associations(VPC).is_empty());
}
