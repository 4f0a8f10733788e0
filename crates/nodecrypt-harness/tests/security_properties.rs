//! Protocol security laws, checked against the cluster and the crypto
//! layer directly.

use std::{collections::HashSet, time::Duration};

use nodecrypt_client::ChatEvent;
use nodecrypt_core::config::RelayConfig;
use nodecrypt_crypto::{chat_open, chat_seal, EcdhKeyPair, PeerKeyPair, CHAT_NONCE_SIZE};
use nodecrypt_harness::Cluster;
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// Relay blindness: a distinctive plaintext marker injected into a
/// broadcast never appears in any relay log line or any frame the relay
/// sends — the relay only ever handles it as opaque ciphertext.
#[test]
fn relay_never_sees_plaintext() {
    const MARKER: &str = "ZK-MARKER-cc2481cdd5";

    let mut cluster = Cluster::new(10);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");
    cluster.connect("carol", "carol", "#test", "p");

    cluster.send_text("alice", MARKER);
    cluster.send_private("alice", "bob", MARKER);

    for line in &cluster.relay_log {
        assert!(!line.contains(MARKER), "marker leaked into relay log: {line}");
    }
    for (_, frame) in &cluster.relay_sent {
        assert!(!frame.contains(MARKER), "marker leaked into an outbound frame");
    }

    // The marker did travel: both recipients decrypted it
    for name in ["bob", "carol"] {
        assert!(cluster.client(name).messages().iter().any(|event| matches!(
            event,
            ChatEvent::Message { data, .. } if data == MARKER
        )));
    }
}

/// Session-key uniqueness: fresh ECDH per session means fresh AES keys.
#[test]
fn session_keys_are_pairwise_distinct() {
    let mut rng = StdRng::seed_from_u64(11);
    let relay_side = EcdhKeyPair::generate(&mut rng);

    let mut keys = HashSet::new();
    for _ in 0..100 {
        let client_side = EcdhKeyPair::generate(&mut rng);
        let key = relay_side.derive_session_key(&client_side.public_sec1()).unwrap();
        assert!(keys.insert(key), "duplicate session key");
    }
}

/// Password separation: mismatched passwords yield unrelated chat keys,
/// and every decryption attempt yields garbage.
#[test]
fn wrong_password_never_decrypts() {
    let mut rng = StdRng::seed_from_u64(12);
    let alice = PeerKeyPair::generate(&mut rng);
    let bob = PeerKeyPair::generate(&mut rng);

    let key_p = alice.derive_chat_key(&bob.public_bytes(), "p");
    let key_q = bob.derive_chat_key(&alice.public_bytes(), "q");
    assert_ne!(key_p, key_q);

    for _ in 0..1000 {
        let mut plaintext = vec![0u8; 64];
        rng.fill_bytes(&mut plaintext);

        let mut nonce = [0u8; CHAT_NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let sealed = chat_seal(&key_p, nonce, &plaintext);
        let opened = chat_open(&key_q, &sealed).unwrap();
        assert_ne!(opened, plaintext);
    }
}

/// Round-trip: matching passwords give byte-exact decryption both ways.
#[test]
fn matching_password_round_trips_exactly() {
    let mut rng = StdRng::seed_from_u64(13);
    let alice = PeerKeyPair::generate(&mut rng);
    let bob = PeerKeyPair::generate(&mut rng);

    let key_a = alice.derive_chat_key(&bob.public_bytes(), "hunter2");
    let key_b = bob.derive_chat_key(&alice.public_bytes(), "hunter2");

    for length in [0usize, 1, 15, 16, 17, 64, 1024, 65536] {
        let mut plaintext = vec![0u8; length];
        rng.fill_bytes(&mut plaintext);

        let mut nonce = [0u8; CHAT_NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let opened = chat_open(&key_b, &chat_seal(&key_a, nonce, &plaintext)).unwrap();
        assert_eq!(opened, plaintext);
    }
}

/// Per-sender ordering: messages 1..N from one sender arrive in order.
#[test]
fn sender_order_is_preserved() {
    let mut cluster = Cluster::new(14);
    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");

    for i in 0..20 {
        cluster.send_text("alice", &format!("msg-{i}"));
    }

    let received: Vec<String> = cluster
        .client("bob")
        .messages()
        .iter()
        .filter_map(|event| match event {
            ChatEvent::Message { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect();

    let expected: Vec<String> = (0..20).map(|i| format!("msg-{i}")).collect();
    assert_eq!(received, expected);
}

/// Rotation liveness: after the rotation interval a new client is greeted
/// with a fresh RSA key while existing sessions keep working.
#[test]
fn rotation_serves_new_key_without_breaking_sessions() {
    // Generous idle timeout so only rotation is in play
    let config = RelayConfig {
        idle_timeout: Duration::from_secs(48 * 3600),
        ..RelayConfig::default()
    };
    let mut cluster = Cluster::with_config(15, config);

    cluster.connect("alice", "alice", "#test", "p");
    cluster.connect("bob", "bob", "#test", "p");
    let old_pub = cluster.hello_server_pub("alice");

    cluster.env.advance(Duration::from_secs(24 * 3600));
    cluster.tick_relay();
    assert!(cluster.relay_log.iter().any(|line| line.contains("identity rotated")));

    // Existing sessions are untouched
    cluster.send_text("alice", "post-rotation");
    assert_eq!(cluster.client("bob").messages().len(), 1);

    // A fresh connection sees the new key
    cluster.connect("dave", "dave", "#test", "p");
    let new_pub = cluster.hello_server_pub("dave");
    assert_ne!(old_pub, new_pub);
    assert!(cluster.client("dave").client.is_secured());
}
