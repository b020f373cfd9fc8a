//! End-to-end flows through the [`MessageExchange`] facade with the real
//! ratchet engine underneath.

use std::time::Duration;

use confab_crypto::{CryptoError, ORDINARY_MESSAGE_TAG, PREKEY_MESSAGE_TAG};
use confab_session::{MessageExchange, SessionError};

#[tokio::test]
async fn prekey_handshake_then_round_trip() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    exchange.create_identity("sebastian");

    exchange.establish_session("duvan", "sebastian").await.unwrap();
    assert!(exchange.has_session("duvan", "sebastian"));
    assert!(!exchange.has_session("sebastian", "duvan"));

    let id = exchange.send("duvan", "sebastian", "Foo").await.unwrap();

    // Before the peer has replied, outbound messages carry the handshake.
    let pending = exchange.pending();
    assert_eq!(pending[0].payload.tag, PREKEY_MESSAGE_TAG);
    assert!(pending[0].payload.handshake.is_some());

    exchange.drain().await;

    let delivered = exchange.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, id);
    assert_eq!(delivered[0].to, "sebastian");
    assert_eq!(delivered[0].from, "duvan");
    assert_eq!(delivered[0].plaintext, "Foo");
    assert!(exchange.has_session("sebastian", "duvan"));
    assert!(exchange.failures().is_empty());
}

#[tokio::test]
async fn reply_acknowledges_the_handshake() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    exchange.create_identity("sebastian");
    exchange.establish_session("duvan", "sebastian").await.unwrap();

    exchange.send("duvan", "sebastian", "hello").await.unwrap();
    exchange.drain().await;

    // The responder never ran a handshake of its own; its reply is
    // ordinary from the start.
    exchange.send("sebastian", "duvan", "hi back").await.unwrap();
    exchange.drain().await;

    let delivered = exchange.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].plaintext, "hi back");
    assert_eq!(exchange.pending()[1].payload.tag, ORDINARY_MESSAGE_TAG);

    // Receiving the reply acknowledged the session, so the initiator
    // stops attaching handshake material.
    exchange.send("duvan", "sebastian", "great").await.unwrap();
    assert_eq!(exchange.pending()[2].payload.tag, ORDINARY_MESSAGE_TAG);
    exchange.drain().await;
    assert_eq!(exchange.delivered()[2].plaintext, "great");
    assert!(exchange.failures().is_empty());
}

#[tokio::test]
async fn repeated_prekey_messages_before_any_reply() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    exchange.create_identity("sebastian");
    exchange.establish_session("duvan", "sebastian").await.unwrap();

    for text in ["one", "two", "three"] {
        exchange.send("duvan", "sebastian", text).await.unwrap();
    }
    exchange.drain().await;

    let delivered = exchange.delivered();
    assert_eq!(delivered.len(), 3);
    assert_eq!(
        delivered.iter().map(|m| m.plaintext.as_str()).collect::<Vec<_>>(),
        ["one", "two", "three"]
    );
    // All three carried the handshake; only the first finalizes the
    // responder session, the rest reuse it.
    assert!(exchange
        .pending()
        .iter()
        .all(|m| m.payload.tag == PREKEY_MESSAGE_TAG));
    assert!(exchange.failures().is_empty());
}

#[tokio::test]
async fn establish_requires_both_identities() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");

    let err = exchange.establish_session("duvan", "sebastian").await.unwrap_err();
    assert!(matches!(err, SessionError::IdentityNotFound(name) if name == "sebastian"));

    let err = exchange.establish_session("ghost", "duvan").await.unwrap_err();
    assert!(matches!(err, SessionError::IdentityNotFound(name) if name == "ghost"));
}

#[tokio::test]
async fn send_without_session_fails() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    exchange.create_identity("sebastian");

    let err = exchange.send("duvan", "sebastian", "hello").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Crypto(CryptoError::NoSession { .. })
    ));
}

#[tokio::test]
async fn identity_recreation_breaks_established_sessions() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    let first_registration = exchange.registration_id("sebastian_peer");
    assert!(first_registration.is_none());

    exchange.create_identity("sebastian");
    exchange.establish_session("duvan", "sebastian").await.unwrap();
    exchange.send("duvan", "sebastian", "before").await.unwrap();
    exchange.drain().await;
    exchange.send("sebastian", "duvan", "ack").await.unwrap();
    exchange.drain().await;
    assert_eq!(exchange.delivered().len(), 2);

    // Recreating sebastian discards his store; the session duvan holds
    // now points at an identity that no longer exists.
    exchange.create_identity("sebastian");
    assert!(!exchange.has_session("sebastian", "duvan"));

    exchange.send("duvan", "sebastian", "after").await.unwrap();
    exchange.drain().await;

    assert_eq!(exchange.delivered().len(), 2);
    let failures = exchange.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].error,
        SessionError::Crypto(CryptoError::NoSession { .. })
    ));
}

#[tokio::test]
async fn recreated_peer_identity_is_a_mismatch() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    exchange.create_identity("sebastian");
    exchange.establish_session("duvan", "sebastian").await.unwrap();

    // duvan pinned sebastian's first identity key; the republished
    // bundle carries a different one.
    exchange.create_identity("sebastian");
    let err = exchange.establish_session("duvan", "sebastian").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Crypto(CryptoError::IdentityMismatch { .. })
    ));
}

#[tokio::test]
async fn garbage_ciphertext_poisons_the_session() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    exchange.create_identity("sebastian");
    exchange.establish_session("duvan", "sebastian").await.unwrap();
    exchange.send("duvan", "sebastian", "hello").await.unwrap();
    exchange.drain().await;
    exchange.send("sebastian", "duvan", "ack").await.unwrap();
    exchange.drain().await;

    // A forged ordinary message that fails authentication invalidates
    // the session on the receiving side.
    let forged = confab_crypto::CiphertextPayload::ordinary(vec![0u8; 40]);
    exchange.enqueue("sebastian", "duvan", forged);

    // A genuine ordinary message enqueued behind the forgery is
    // refused too.
    exchange.send("duvan", "sebastian", "world").await.unwrap();
    exchange.drain().await;

    assert_eq!(exchange.delivered().len(), 2);
    let failures = exchange.failures();
    assert_eq!(failures.len(), 2);
    assert!(matches!(
        failures[0].error,
        SessionError::Crypto(CryptoError::Decryption(_))
    ));
    assert!(matches!(
        failures[1].error,
        SessionError::Crypto(CryptoError::Decryption(_))
    ));
}

#[tokio::test]
async fn background_task_delivers_and_shuts_down() {
    let exchange = MessageExchange::new();
    exchange.create_identity("duvan");
    exchange.create_identity("sebastian");
    exchange.establish_session("duvan", "sebastian").await.unwrap();

    let (task, shutdown) = exchange.start();

    exchange.send("duvan", "sebastian", "ping").await.unwrap();
    while exchange.delivered().is_empty() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(exchange.delivered()[0].plaintext, "ping");

    shutdown.send(()).await.unwrap();
    task.await.unwrap();
}
