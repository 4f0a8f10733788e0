//! End-to-end scenarios against the simulated cluster.

use std::time::Duration;

use nodecrypt_client::ChatEvent;
use nodecrypt_harness::Cluster;

/// Handshake completes: the client is secured and the relay accepted its
/// sealed join, which only works if both sides derived the same AES key.
#[test]
fn handshake_and_join() {
    let mut cluster = Cluster::new(1);
    cluster.connect("alice", "alice", "#test", "p");

    let alice = cluster.client("alice");
    assert!(alice.client.is_secured());
    assert!(alice.events.contains(&ChatEvent::Secured));
    assert!(alice.errors.is_empty());

    let id = cluster.client_id("alice");
    assert_eq!(cluster.relay.channel_members("#test"), &[id]);
}

/// Join and list: the joiner's warmup is the individual list plus the join
/// broadcast; an existing member sees one additional list per join.
#[test]
fn join_and_list_warmup() {
    let mut cluster = Cluster::new(2);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");

    // Warmup pair for the newest joiner, one extra frame for the resident
    assert_eq!(cluster.client("bob").roster_count(), 2);
    assert_eq!(cluster.client("alice").roster_count(), 3);

    let alice_id = cluster.client_id("alice");
    let bob_id = cluster.client_id("bob");

    // Each side's latest roster names the other
    for (name, other_id, other_name) in
        [("alice", bob_id, "bob"), ("bob", alice_id, "alice")]
    {
        let rosters: Vec<_> = cluster
            .client(name)
            .events
            .iter()
            .filter_map(|event| match event {
                ChatEvent::Roster { members } => Some(members),
                _ => None,
            })
            .collect();
        let last = rosters.last().expect("at least one roster");
        assert!(last
            .iter()
            .any(|member| member.client_id == other_id && member.user_name == other_name));
    }

    // Bob's arrival lands inside alice's post-warmup window
    assert!(cluster
        .client("alice")
        .events
        .contains(&ChatEvent::PeerJoined { client_id: bob_id, user_name: "bob".into() }));
}

/// Broadcast: bob receives alice's text, alice gets no echo.
#[test]
fn broadcast_reaches_peers_without_echo() {
    let mut cluster = Cluster::new(3);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");

    cluster.send_text("alice", "hi");

    let bob_messages = cluster.client("bob").messages();
    assert_eq!(bob_messages.len(), 1);
    match bob_messages[0] {
        ChatEvent::Message { from_name, data, private, .. } => {
            assert_eq!(from_name, "alice");
            assert_eq!(data, "hi");
            assert!(!*private);
        },
        other => panic!("expected message, got {other:?}"),
    }

    assert!(cluster.client("alice").messages().is_empty());
}

/// Private: only the addressed peer sees the message.
#[test]
fn private_message_is_isolated() {
    let mut cluster = Cluster::new(4);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");
    cluster.connect("carol", "carol", "#test", "p");

    cluster.send_private("alice", "bob", "secret");

    let bob_messages = cluster.client("bob").messages();
    assert_eq!(bob_messages.len(), 1);
    match bob_messages[0] {
        ChatEvent::Message { data, private, .. } => {
            assert_eq!(data, "secret");
            assert!(*private);
        },
        other => panic!("expected message, got {other:?}"),
    }

    assert!(cluster.client("carol").messages().is_empty());
}

/// Wrong password: decryption fails quietly, the session survives.
#[test]
fn wrong_password_is_nonfatal_garbage() {
    let mut cluster = Cluster::new(5);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");
    cluster.connect("carol", "carol", "#test", "q");

    cluster.send_text("alice", "for the p-holders");

    // Bob decrypts; carol's derived key is unrelated
    assert_eq!(cluster.client("bob").messages().len(), 1);
    assert!(cluster.client("carol").messages().is_empty());
    assert!(cluster.client("carol").decrypt_failures() >= 1);

    // And it never became a transport problem for carol
    assert!(cluster.client("carol").errors.is_empty());
    assert!(cluster.client("carol").connected);
}

/// Idle: a silent transport is closed after the idle window, remaining
/// members get the shrunk list, and the peer session is torn down.
#[test]
fn idle_session_is_reaped() {
    let mut cluster = Cluster::new(6);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");
    let alice_id = cluster.client_id("alice");
    let bob_id = cluster.client_id("bob");

    // Alice keeps talking; bob goes silent for 61 s total
    cluster.env.advance(Duration::from_secs(40));
    cluster.send_text("alice", "still here");
    cluster.env.advance(Duration::from_secs(21));
    cluster.tick_relay();

    assert_eq!(cluster.relay.channel_members("#test"), &[alice_id]);
    assert!(!cluster.client("bob").connected);

    assert!(cluster
        .client("alice")
        .events
        .contains(&ChatEvent::PeerLeft { client_id: bob_id, user_name: "bob".into() }));
    assert!(cluster.client("alice").client.peer_state(bob_id).is_none());
}

/// Payload kinds other than text ride the same path untouched.
#[test]
fn file_chunks_relay_as_opaque_payloads() {
    use nodecrypt_client::ClientEvent;
    use nodecrypt_proto::ChatKind;

    let mut cluster = Cluster::new(7);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");

    cluster.client_event(
        "alice",
        ClientEvent::SendPayload {
            kind: ChatKind::FileVolume,
            data: "QmFzZTY0IGNodW5rIGJ5dGVz".into(),
            target: None,
        },
    );

    let bob_messages = cluster.client("bob").messages();
    assert_eq!(bob_messages.len(), 1);
    match bob_messages[0] {
        ChatEvent::Message { kind, data, .. } => {
            assert_eq!(*kind, ChatKind::FileVolume);
            assert_eq!(data, "QmFzZTY0IGNodW5rIGJ5dGVz");
        },
        other => panic!("expected message, got {other:?}"),
    }
}

/// A disconnect announces the departure to the rest of the channel.
#[test]
fn disconnect_broadcasts_departure() {
    let mut cluster = Cluster::new(8);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");
    cluster.connect("carol", "carol", "#test", "p");
    let bob_id = cluster.client_id("bob");

    cluster.disconnect("bob");

    for name in ["alice", "carol"] {
        assert!(cluster
            .client(name)
            .events
            .iter()
            .any(|event| matches!(event, ChatEvent::PeerLeft { client_id, .. } if *client_id == bob_id)));
        assert!(cluster.client(name).client.peer_state(bob_id).is_none());
    }
}
