//! End-to-end session engine tests over the in-process transport.
//!
//! Each test wires real engines to a shared hub and drives them only
//! through their public handles, the same way a UI layer would.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::sync::mpsc;

use veil_net::{MemoryHub, Transport};
use veil_session::{
    spawn_engine, EngineConfig, NoticeLevel, SessionHandle, SessionNotification,
};
use veil_shared::constants::{PLACEHOLDER_MISSING_KEY, SNIPPET_MAX_CHARS};
use veil_shared::crypto::Envelope;
use veil_shared::{
    ConnectionStatus, EncryptionMode, MessageKind, PeerAddress, ServerStatus, WireMessage,
};
use veil_store::Database;

struct TestPeer {
    address: PeerAddress,
    handle: SessionHandle,
    events: mpsc::Receiver<SessionNotification>,
}

async fn spawn_peer(hub: &MemoryHub, addr: &str, name: &str) -> TestPeer {
    let address = PeerAddress::from(addr);
    let (transport, transport_events) = hub.endpoint(address.clone());
    let db = Database::in_memory().expect("in-memory store");
    let (handle, events) = spawn_engine(transport, transport_events, db, EngineConfig::fast());
    handle.set_username(name).await;

    let mut peer = TestPeer {
        address,
        handle,
        events,
    };
    // The engine reports signaling connectivity first; wait for it so
    // connects cannot race the ServerUp event.
    wait_for(&mut peer.events, |n| {
        matches!(
            n,
            SessionNotification::ServerStatusChanged {
                status: ServerStatus::Connected
            }
        )
    })
    .await;
    peer
}

async fn wait_for(
    events: &mut mpsc::Receiver<SessionNotification>,
    pred: impl Fn(&SessionNotification) -> bool,
) -> SessionNotification {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("notification stream alive");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected notification within deadline")
}

/// Save each peer in the other's contact list, so handshakes auto-accept.
async fn make_mutual_contacts(alice: &TestPeer, bob: &TestPeer) {
    alice
        .handle
        .add_contact(bob.address.clone(), "Bob")
        .await;
    bob.handle
        .add_contact(alice.address.clone(), "Alice")
        .await;
    // Queries round-trip through the engines, so both writes are done.
    let _ = alice.handle.contacts().await;
    let _ = bob.handle.contacts().await;
}

/// Focus Bob from Alice's side and wait until Bob (a mutual contact)
/// auto-accepts the re-establishment handshake.
async fn connect_contacts(alice: &mut TestPeer, bob: &TestPeer) {
    alice
        .handle
        .start_conversation(bob.address.clone())
        .await;
    wait_for(&mut alice.events, |n| {
        matches!(n, SessionNotification::RequestAccepted { .. })
    })
    .await;
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_accept_scenario() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;

    alice
        .handle
        .start_conversation(bob.address.clone())
        .await;

    // Alice blocks on approval once her request is out.
    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::WaitingForApproval { waiting: true }
        )
    })
    .await;

    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::RequestReceived { .. })
    })
    .await;
    let pending = bob.handle.pending_requests().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, alice.address);
    assert_eq!(pending[0].name, "Alice");

    bob.handle.accept_request(alice.address.clone()).await;

    let contacts = bob.handle.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].id, alice.address);
    assert_eq!(contacts[0].name, "Alice");
    assert!(bob.handle.pending_requests().await.is_empty());

    match wait_for(&mut alice.events, |n| {
        matches!(n, SessionNotification::RequestAccepted { .. })
    })
    .await
    {
        SessionNotification::RequestAccepted { peer, name } => {
            assert_eq!(peer, bob.address);
            assert_eq!(name, "Bob");
        }
        other => panic!("unexpected notification {other:?}"),
    }

    let status = alice.handle.status().await.unwrap();
    assert!(!status.waiting_for_approval);
    assert_eq!(status.connection, ConnectionStatus::Connected);
}

#[tokio::test]
async fn duplicate_requests_yield_single_pending_entry() {
    let hub = MemoryHub::new();
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;

    let (eve, _eve_events) = hub.endpoint(PeerAddress::from("veil-eve111"));
    let channel = eve.connect(&bob.address).await.unwrap();
    let frame = WireMessage::ConnectionRequest { name: "Eve".into() }
        .to_bytes()
        .unwrap();
    channel.send(frame.clone()).unwrap();
    channel.send(frame).unwrap();

    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::RequestReceived { .. })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(bob.handle.pending_requests().await.len(), 1);
}

#[tokio::test]
async fn rejection_tears_down_conversation() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;

    alice
        .handle
        .start_conversation(bob.address.clone())
        .await;
    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::RequestReceived { .. })
    })
    .await;

    bob.handle.reject_request(alice.address.clone()).await;

    wait_for(&mut alice.events, |n| {
        matches!(n, SessionNotification::ConnectionRejected { .. })
    })
    .await;
    let status = alice.handle.status().await.unwrap();
    assert!(status.focused_peer.is_none());
    assert!(!status.waiting_for_approval);
    assert!(bob.handle.pending_requests().await.is_empty());
}

#[tokio::test]
async fn send_is_blocked_while_waiting_for_approval() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let bob = spawn_peer(&hub, "veil-bob111", "Bob").await;

    alice
        .handle
        .start_conversation(bob.address.clone())
        .await;
    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::WaitingForApproval { waiting: true }
        )
    })
    .await;

    alice
        .handle
        .send_message("too soon", MessageKind::Text, None)
        .await;
    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::Notice {
                level: NoticeLevel::Info,
                ..
            }
        )
    })
    .await;
    assert!(alice.handle.history(bob.address.clone()).await.is_empty());
}

// ---------------------------------------------------------------------------
// Trust boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_sender_chat_frames_are_dropped() {
    let hub = MemoryHub::new();
    let bob = spawn_peer(&hub, "veil-bob111", "Bob").await;

    let eve_address = PeerAddress::from("veil-eve111");
    let (eve, _eve_events) = hub.endpoint(eve_address.clone());
    let channel = eve.connect(&bob.address).await.unwrap();

    for frame in [
        WireMessage::Message {
            id: "m1".into(),
            content: "smuggled".into(),
            msg_type: MessageKind::Text,
            is_encrypted: false,
            burn_timer: None,
        },
        WireMessage::Typing { is_typing: true },
        WireMessage::Reaction {
            message_id: "m1".into(),
            emoji: "💀".into(),
        },
    ] {
        channel.send(frame.to_bytes().unwrap()).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // No history, no unread, no recents: the frames left no trace.
    assert!(bob.handle.history(eve_address).await.is_empty());
    assert!(bob.handle.unread_counts().await.is_empty());
    assert!(bob.handle.recents().await.is_empty());
}

// ---------------------------------------------------------------------------
// Messaging, focus and unread
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unfocused_messages_increment_unread_and_focus_clears() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;

    alice
        .handle
        .send_message("one", MessageKind::Text, None)
        .await;
    alice
        .handle
        .send_message("two", MessageKind::Text, None)
        .await;

    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::UnreadChanged { count: 2, .. })
    })
    .await;
    assert_eq!(
        bob.handle.unread_counts().await.get(&alice.address),
        Some(&2)
    );
    assert_eq!(bob.handle.history(alice.address.clone()).await.len(), 2);

    // Focusing the conversation clears the badge.
    bob.handle.start_conversation(alice.address.clone()).await;
    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::UnreadChanged { count: 0, .. })
    })
    .await;
    assert!(bob.handle.unread_counts().await.is_empty());

    // Focused now: the next message renders live, no unread.
    alice
        .handle
        .send_message("three", MessageKind::Text, None)
        .await;
    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::MessageAppended { .. })
    })
    .await;
    assert!(bob.handle.unread_counts().await.is_empty());
    assert_eq!(bob.handle.history(alice.address.clone()).await.len(), 3);
}

#[tokio::test]
async fn delivery_status_and_recents_follow_a_send() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;

    alice
        .handle
        .send_message(
            "a rather long line of text that will not fit in a snippet",
            MessageKind::Text,
            None,
        )
        .await;

    let history = alice.handle.history(bob.address.clone()).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].is_me);
    assert_eq!(history[0].status, Some(veil_store::DeliveryStatus::Sent));

    let recents = alice.handle.recents().await;
    assert_eq!(recents.len(), 1);
    assert_eq!(recents[0].id, bob.address);
    assert_eq!(recents[0].name.as_deref(), Some("Bob"));
    assert_eq!(recents[0].snippet.chars().count(), SNIPPET_MAX_CHARS + 3);
}

#[tokio::test]
async fn contact_card_messages_use_card_snippet() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;

    let card = serde_json::json!({ "id": "veil-carol1", "name": "Carol" }).to_string();
    alice
        .handle
        .send_message(card, MessageKind::Contact, None)
        .await;

    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::UnreadChanged { .. })
    })
    .await;
    let history = bob.handle.history(alice.address.clone()).await;
    assert_eq!(history[0].kind, MessageKind::Contact);
    assert_eq!(bob.handle.recents().await[0].snippet, "[Contact Card]");
}

#[tokio::test]
async fn burn_timer_deletes_on_both_sides() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;

    alice
        .handle
        .send_message("this message will self-destruct", MessageKind::Text, Some(1))
        .await;

    // Present immediately after send/receive.
    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::UnreadChanged { .. })
    })
    .await;
    assert_eq!(alice.handle.history(bob.address.clone()).await.len(), 1);
    assert_eq!(bob.handle.history(alice.address.clone()).await.len(), 1);

    // Gone after the timer, with Bob's conversation never focused.
    wait_for(&mut alice.events, |n| {
        matches!(n, SessionNotification::MessageExpired { .. })
    })
    .await;
    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::MessageExpired { .. })
    })
    .await;
    assert!(alice.handle.history(bob.address.clone()).await.is_empty());
    assert!(bob.handle.history(alice.address.clone()).await.is_empty());
}

#[tokio::test]
async fn reactions_replace_prior_reaction_per_sender() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;

    alice
        .handle
        .send_message("react to me", MessageKind::Text, None)
        .await;
    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::UnreadChanged { .. })
    })
    .await;
    let message_id = bob.handle.history(alice.address.clone()).await[0].id.clone();

    bob.handle.start_conversation(alice.address.clone()).await;
    bob.handle.send_reaction(message_id.clone(), "👍").await;
    bob.handle.send_reaction(message_id.clone(), "🔥").await;

    // Two updates on Alice's side; the second wins.
    wait_for(&mut alice.events, |n| {
        matches!(n, SessionNotification::MessageUpdated { .. })
    })
    .await;
    wait_for(&mut alice.events, |n| {
        matches!(n, SessionNotification::MessageUpdated { .. })
    })
    .await;

    let history = alice.handle.history(bob.address.clone()).await;
    let reactions = &history[0].reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "🔥");
    assert_eq!(reactions[0].sender_id, bob.address);

    // Bob's stored copy carries the reaction too.
    let bob_history = bob.handle.history(alice.address.clone()).await;
    assert_eq!(bob_history[0].reactions.len(), 1);
    assert_eq!(bob_history[0].reactions[0].emoji, "🔥");
}

#[tokio::test]
async fn typing_indicator_raises_and_debounces() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;
    bob.handle.start_conversation(alice.address.clone()).await;

    alice.handle.notify_typing().await;

    wait_for(&mut bob.events, |n| {
        matches!(
            n,
            SessionNotification::PeerTyping { is_typing: true, .. }
        )
    })
    .await;
    // No further keystrokes: the debounce clears the indicator by itself.
    wait_for(&mut bob.events, |n| {
        matches!(
            n,
            SessionNotification::PeerTyping {
                is_typing: false,
                ..
            }
        )
    })
    .await;
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shared_passphrase_decrypts_between_peers() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;

    alice
        .handle
        .set_encryption(EncryptionMode::Aes256, Some("correct horse".into()))
        .await;
    bob.handle
        .pin_contact_secret(alice.address.clone(), EncryptionMode::Aes256, "correct horse")
        .await;
    let _ = bob.handle.contacts().await; // pin is processed

    alice
        .handle
        .send_message("hello bob", MessageKind::Text, None)
        .await;

    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::UnreadChanged { .. })
    })
    .await;
    let bob_history = bob.handle.history(alice.address.clone()).await;
    let received = &bob_history[0];
    assert_eq!(received.content, "hello bob");
    assert!(received.is_encrypted);
    assert!(received.ciphertext.is_none());

    // Alice's own copy is stored as plaintext, never ciphertext.
    let alice_history = alice.handle.history(bob.address.clone()).await;
    let sent = &alice_history[0];
    assert_eq!(sent.content, "hello bob");
    assert!(sent.is_encrypted);
}

#[tokio::test]
async fn encrypted_image_without_key_shows_placeholder_and_keeps_ciphertext() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let mut bob = spawn_peer(&hub, "veil-bob111", "Bob").await;
    make_mutual_contacts(&alice, &bob).await;
    connect_contacts(&mut alice, &bob).await;

    alice
        .handle
        .set_encryption(EncryptionMode::Aes256, Some("alice only".into()))
        .await;

    let pixels: Vec<u8> = (0..48).collect();
    alice
        .handle
        .send_message(BASE64.encode(&pixels), MessageKind::Image, None)
        .await;

    wait_for(&mut bob.events, |n| {
        matches!(n, SessionNotification::UnreadChanged { .. })
    })
    .await;
    let bob_history = bob.handle.history(alice.address.clone()).await;
    let received = &bob_history[0];

    // Displayed content is the fixed placeholder...
    assert_eq!(received.content, PLACEHOLDER_MISSING_KEY);
    assert!(received.is_encrypted);

    // ...and the raw envelope is retained, decryptable once a key exists.
    let raw = received.ciphertext.as_deref().expect("envelope retained");
    let envelope = Envelope::from_json(raw).expect("well-formed envelope");
    assert_eq!(envelope.iv.len(), 12);
    let key = veil_shared::derive_key("alice only").unwrap();
    assert_eq!(veil_shared::decrypt(&key, &envelope).unwrap(), pixels);
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_timeout_surfaces_error() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let _bob = spawn_peer(&hub, "veil-bob111", "Bob").await;

    hub.set_hold_open(true);
    alice
        .handle
        .start_conversation(PeerAddress::from("veil-bob111"))
        .await;

    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::FocusedStatusChanged {
                status: ConnectionStatus::Error
            }
        )
    })
    .await;
    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::Notice {
                level: NoticeLevel::Error,
                ..
            }
        )
    })
    .await;
}

#[tokio::test]
async fn self_connect_is_rejected_before_dialing() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;

    alice
        .handle
        .start_conversation(alice.address.clone())
        .await;

    match wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::Notice {
                level: NoticeLevel::Error,
                ..
            }
        )
    })
    .await
    {
        SessionNotification::Notice { text, .. } => {
            assert!(text.contains("own address"));
        }
        other => panic!("unexpected notification {other:?}"),
    }
    assert!(alice.handle.status().await.unwrap().focused_peer.is_none());
}

#[tokio::test]
async fn offline_connect_is_refused_with_a_notice() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;
    let bob = spawn_peer(&hub, "veil-bob111", "Bob").await;

    hub.set_online(&alice.address, false);
    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::ServerStatusChanged {
                status: ServerStatus::Disconnected
            }
        )
    })
    .await;

    alice
        .handle
        .start_conversation(bob.address.clone())
        .await;
    match wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::Notice {
                level: NoticeLevel::Error,
                ..
            }
        )
    })
    .await
    {
        SessionNotification::Notice { text, .. } => assert!(text.contains("offline")),
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn signaling_reconnects_after_backoff() {
    let hub = MemoryHub::new();
    let mut alice = spawn_peer(&hub, "veil-alice1", "Alice").await;

    hub.set_online(&alice.address, false);
    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::ServerStatusChanged {
                status: ServerStatus::Disconnected
            }
        )
    })
    .await;

    // The engine keeps re-dialing on a fixed backoff; once the hub is
    // reachable again the next attempt lands.
    hub.set_online(&alice.address, true);
    wait_for(&mut alice.events, |n| {
        matches!(
            n,
            SessionNotification::ServerStatusChanged {
                status: ServerStatus::Connected
            }
        )
    })
    .await;
}
