//! Two in-process peers: friend-request handshake, then an encrypted chat.
//!
//! Run with: `cargo run -p veil-session --example loopback`

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use veil_net::MemoryHub;
use veil_session::{spawn_engine, EngineConfig, SessionNotification};
use veil_shared::{EncryptionMode, MessageKind, PeerAddress};
use veil_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let hub = MemoryHub::new();
    let alice_addr = PeerAddress::from("veil-alice1");
    let bob_addr = PeerAddress::from("veil-bob111");

    let (alice, mut alice_events) = {
        let (transport, events) = hub.endpoint(alice_addr.clone());
        spawn_engine(transport, events, Database::in_memory()?, EngineConfig::default())
    };
    let (bob, mut bob_events) = {
        let (transport, events) = hub.endpoint(bob_addr.clone());
        spawn_engine(transport, events, Database::in_memory()?, EngineConfig::default())
    };

    alice.set_username("Alice").await;
    bob.set_username("Bob").await;

    // Bob answers the friend request as soon as it arrives.
    let bob_handle = bob.clone();
    tokio::spawn(async move {
        while let Some(event) = bob_events.recv().await {
            println!("[bob]   {event:?}");
            if let SessionNotification::RequestReceived { request } = event {
                bob_handle.accept_request(request.id).await;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = alice_events.recv().await {
            println!("[alice] {event:?}");
        }
    });

    // Alice opens the conversation; the handshake runs underneath.
    alice.start_conversation(bob_addr.clone()).await;

    // Wait for Bob to have accepted (he saves Alice as a contact) and for
    // Alice to have seen the acceptance.
    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !bob.contacts().await.is_empty() {
            break;
        }
    }
    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = alice.status().await.expect("engine alive");
        if !status.waiting_for_approval
            && status.connection == veil_shared::ConnectionStatus::Connected
        {
            break;
        }
    }

    // Both sides type the same passphrase; the derived keys match.
    alice
        .set_encryption(EncryptionMode::Aes256, Some("correct horse".into()))
        .await;
    bob.pin_contact_secret(alice_addr.clone(), EncryptionMode::Aes256, "correct horse")
        .await;
    // Round-trip a query so the pin is processed before the message lands.
    let _ = bob.contacts().await;

    alice
        .send_message("The tunnel is clear tonight.", MessageKind::Text, None)
        .await;

    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = bob.history(alice_addr.clone()).await;
        if let Some(message) = history.first() {
            println!(
                "[bob]   history: {:?} from {} (encrypted: {})",
                message.content, message.sender_id, message.is_encrypted
            );
            break;
        }
    }

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}
