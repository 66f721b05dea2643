//! Credential-gated materialization across replicas.

use std::time::Duration;

use weft::{Capability, EngineError, KnowledgeVector};
use weft_testkit::{device, sync_pair, Space, TestPeer, WAIT};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn only(log: weft::LogKey, len: u64) -> KnowledgeVector {
    [(log, len)].into_iter().collect()
}

#[tokio::test]
async fn test_uncredentialed_writer_never_affects_state() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x20);
    let a = space.writer(1).await?;
    let stranger = space.open(device(3)).await?;

    stranger.put("doc", "title", "vandalized").await?;
    stranger.put("doc", "body", "spam").await?;
    a.put("doc", "title", "original").await?;

    sync_pair(&a, &stranger).await?;

    // Replicated and decoded, but held back.
    a.engine
        .wait_until_observed(&only(stranger.key(), 2), WAIT)
        .await?;
    settle_authorized(&a).await?;
    assert_eq!(a.engine.applied().get(&stranger.key()), 0);
    assert_eq!(a.text("doc", "title").as_deref(), Some("original"));
    assert_eq!(a.text("doc", "body"), None);

    let waited = a
        .engine
        .wait_until_applied(&only(stranger.key(), 1), Duration::from_millis(100))
        .await;
    assert!(matches!(waited, Err(EngineError::Timeout(_))));
    Ok(())
}

#[tokio::test]
async fn test_late_grant_releases_held_writes() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x21);
    let a = space.writer(1).await?;
    let late = space.open(device(4)).await?;

    late.put("doc", "status", "drafted").await?;
    sync_pair(&a, &late).await?;
    a.engine.wait_until_observed(&only(late.key(), 1), WAIT).await?;
    assert_eq!(a.text("doc", "status"), None);

    let credential = space.enroll(late.key(), Capability::Write);
    assert_eq!(a.engine.admit(&credential)?, 1);

    a.engine.wait_until_applied(&only(late.key(), 1), WAIT).await?;
    assert_eq!(a.text("doc", "status").as_deref(), Some("drafted"));
    Ok(())
}

#[tokio::test]
async fn test_child_credential_before_parent_is_deferred() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x22);
    // Opened before the admin exists, so it has never seen the admin's
    // credential.
    let a = space.writer(1).await?;

    let admin_key = device(8);
    let admin_credential = space.enroll(admin_key.public_key(), Capability::Admin);
    let admin = space.open(admin_key).await?;
    let member = space.open(device(9)).await?;

    // The admin publishes the member's grant in its own log.
    let grant = admin.engine.grant(member.key(), Capability::Write).await?;
    assert_eq!(grant.parent, Some(admin_credential.id()));
    member.put("doc", "owner", "member").await?;

    sync_pair(&a, &admin).await?;
    sync_pair(&a, &member).await?;
    a.engine.wait_until_observed(&only(admin.key(), 1), WAIT).await?;
    a.engine.wait_until_observed(&only(member.key(), 1), WAIT).await?;

    assert!(!a.engine.keys().is_authorized(&member.key(), Capability::Write));
    assert_eq!(a.engine.keys().deferred_len(), 1);
    assert_eq!(a.text("doc", "owner"), None);

    // The parent arrives: both credentials are admitted.
    assert_eq!(a.engine.admit(&admin_credential)?, 2);
    assert!(a.engine.keys().is_authorized(&member.key(), Capability::Write));
    assert_eq!(a.engine.keys().deferred_len(), 0);

    a.engine.wait_until_applied(&only(member.key(), 1), WAIT).await?;
    assert_eq!(a.text("doc", "owner").as_deref(), Some("member"));
    Ok(())
}

#[tokio::test]
async fn test_grant_requires_admin() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x23);
    let writer = space.writer(1).await?;

    let result = writer.engine.grant(device(2).public_key(), Capability::Write).await;
    assert!(matches!(result, Err(EngineError::NotAuthorized(_))));
    Ok(())
}

/// Wait until every log whose writer may write is applied.
async fn settle_authorized(peer: &TestPeer) -> weft::Result<()> {
    let keys = peer.engine.keys();
    let target: KnowledgeVector = peer
        .knowledge()
        .await
        .iter()
        .filter(|(key, _)| keys.is_authorized(key, Capability::Write))
        .map(|(key, len)| (*key, *len))
        .collect();
    peer.engine.wait_until_applied(&target, WAIT).await
}
