//! Two replicas exchanging writes over an in-memory transport.

use weft_testkit::{sync_pair, Space, WAIT};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_two_peers_exchange_missing_entries() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x01);
    let a = space.writer(1).await?;
    let b = space.writer(2).await?;

    for (i, title) in ["m1", "m2", "m3"].iter().enumerate() {
        a.put(&format!("todo-{}", i + 1), "title", *title).await?;
    }
    b.put("todo-4", "title", "m4").await?;
    b.put("todo-5", "title", "m5").await?;

    let (ra, rb) = sync_pair(&a, &b).await?;
    assert_eq!(ra.entries_received, 2);
    assert_eq!(rb.entries_received, 3);
    assert_eq!(ra.rejected + rb.rejected, 0);
    assert_eq!(ra.peer, Some(b.key()));
    assert_eq!(rb.peer, Some(a.key()));

    for peer in [&a, &b] {
        let knowledge = peer.knowledge().await;
        assert_eq!(knowledge.get(&a.key()), 3);
        assert_eq!(knowledge.get(&b.key()), 2);

        peer.settle().await?;
        for n in 1..=5 {
            let object = format!("todo-{}", n);
            assert_eq!(peer.text(&object, "title"), Some(format!("m{}", n)));
        }
    }

    assert_eq!(a.engine.digest().await?, b.engine.digest().await?);
    Ok(())
}

#[tokio::test]
async fn test_second_session_transfers_nothing() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x02);
    let a = space.writer(1).await?;
    let b = space.writer(2).await?;

    a.put("note", "body", "hello").await?;
    b.put("note", "tag", "x").await?;
    sync_pair(&a, &b).await?;

    assert!(a.knowledge().await.diff(&b.knowledge().await).is_empty());

    let (ra, rb) = sync_pair(&a, &b).await?;
    assert_eq!(ra.entries_sent, 0);
    assert_eq!(rb.entries_sent, 0);
    assert_eq!(ra.entries_received + rb.entries_received, 0);
    assert_eq!(ra.duplicates + rb.duplicates, 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_writes_converge() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x03);
    let a = space.writer(1).await?;
    let b = space.writer(2).await?;

    a.put("doc", "title", "from a").await?;
    b.put("doc", "title", "from b").await?;
    sync_pair(&a, &b).await?;
    a.settle().await?;
    b.settle().await?;

    assert!(a.text("doc", "title").is_some());
    assert_eq!(a.text("doc", "title"), b.text("doc", "title"));
    assert_eq!(*a.engine.state(), *b.engine.state());
    Ok(())
}

#[tokio::test]
async fn test_live_session_tails_new_writes() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x04);
    let a = space.writer(1).await?;
    let b = space.writer(2).await?;

    let (ta, tb) = weft::sync::MemoryTransport::pair(64);
    let sa = a.engine.start_session(std::sync::Arc::new(ta))?;
    let sb = b.engine.start_session(std::sync::Arc::new(tb))?;
    a.engine.wait_caught_up(sa, WAIT).await?;
    b.engine.wait_caught_up(sb, WAIT).await?;

    // Written after the handshake, so it arrives by push.
    a.put("live", "value", 42i64).await?;
    b.engine.wait_until_applied(&a.knowledge().await, WAIT).await?;
    assert_eq!(b.engine.state().get("live", "value"), Some(&weft::FieldValue::Int(42)));

    let ra = a.engine.close_session(sa).await?;
    b.engine.close_session(sb).await?;
    assert_eq!(ra.entries_pushed, 1);
    Ok(())
}

#[tokio::test]
async fn test_three_peers_relay_through_middle() -> anyhow::Result<()> {
    init_tracing();
    let mut space = Space::new(0x05);
    let a = space.writer(1).await?;
    let b = space.writer(2).await?;
    let c = space.writer(3).await?;

    a.put("x", "from", "a").await?;
    c.put("y", "from", "c").await?;

    sync_pair(&a, &b).await?;
    sync_pair(&b, &c).await?;
    sync_pair(&a, &b).await?;

    for peer in [&a, &b, &c] {
        peer.settle().await?;
        assert_eq!(peer.text("x", "from").as_deref(), Some("a"));
        assert_eq!(peer.text("y", "from").as_deref(), Some("c"));
    }
    assert_eq!(a.engine.digest().await?, c.engine.digest().await?);
    Ok(())
}
