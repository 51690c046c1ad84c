mod common;

use std::time::Duration;

use uuid::Uuid;

use common::Harness;
use motionx_sync::{Backend, Scope};

async fn typing_in_db(h: &Harness, conversation: Uuid, user: Uuid) -> bool {
    h.backend
        .list_typing(conversation)
        .await
        .unwrap()
        .iter()
        .any(|t| t.user_id == user && t.is_typing)
}

async fn settle() {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn typing_flag_clears_after_idle() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;
    let conversation = client.conversations(a.id).start(b.id).await.unwrap();

    let tracker = client.typing(conversation, a.id);
    tracker.keystroke().await;
    assert!(typing_in_db(&h, conversation, a.id).await);

    // Another keystroke pushes the deadline back
    tokio::time::sleep(Duration::from_millis(1500)).await;
    tracker.keystroke().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(tracker.is_typing());
    assert!(typing_in_db(&h, conversation, a.id).await);

    tokio::time::sleep(Duration::from_millis(600)).await;
    settle().await;
    assert!(!tracker.is_typing());
    assert!(!typing_in_db(&h, conversation, a.id).await);
}

#[tokio::test(start_paused = true)]
async fn sending_clears_typing_at_once() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;
    let conversation = client.conversations(a.id).start(b.id).await.unwrap();

    let tracker = client.typing(conversation, a.id);
    tracker.keystroke().await;
    tracker.sent().await;
    assert!(!typing_in_db(&h, conversation, a.id).await);
}

#[tokio::test]
async fn peer_sees_typing_while_conversation_is_open() {
    let h = Harness::new();
    let (one, two) = (h.client(), h.client());
    let a = h.user(&one, "alice@example.com").await;
    let b = h.user(&two, "bob@example.com").await;
    let conversation = one.conversations(a.id).start(b.id).await.unwrap();

    let _view = two.open(Scope::Conversation(conversation)).await;
    let tracker = one.typing(conversation, a.id);
    tracker.keystroke().await;

    common::eventually(|| two.store().typing_users(conversation, b.id) == vec![a.id]).await;
    tracker.sent().await;
    common::eventually(|| two.store().typing_users(conversation, b.id).is_empty()).await;
}
