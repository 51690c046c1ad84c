mod common;

use std::time::Duration;

use uuid::Uuid;

use common::{Harness, eventually, png};
use motionx_sync::{
    AuthUser, Backend, EdgeKey, PostDraft, Scope, SyncError, ValidationError,
};
use motionx_types::models::{DmPolicy, NotificationKind, ProfileSettings};

#[tokio::test]
async fn follow_toggled_twice_returns_to_start() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;

    let followers = client.open_edges(EdgeKey::Follow(b.id)).await;
    let start = followers.count();
    let actions = client.mutations(a.clone());

    assert!(actions.toggle_follow(b.id).await.unwrap());
    assert_eq!(followers.count(), start + 1);
    assert!(h.backend.is_following(a.id, b.id).await.unwrap());

    assert!(!actions.toggle_follow(b.id).await.unwrap());
    assert_eq!(followers.count(), start);
    assert!(!followers.contains(a.id));
    assert!(!h.backend.is_following(a.id, b.id).await.unwrap());
}

#[tokio::test]
async fn like_toggle_without_open_view_reads_remote_state() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let actions = client.mutations(a.clone());
    let post = actions
        .create_post(PostDraft {
            content: Some("deadlift pr".into()),
            attachment: None,
        })
        .await
        .unwrap();

    assert!(actions.toggle_like(&post).await.unwrap());
    assert!(!actions.toggle_like(&post).await.unwrap());
    assert!(h.backend.list_post_edges(motionx_sync::PostEdgeKind::Like, post.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_toggle_rolls_back() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;

    // No such post: the like row violates its foreign key
    let missing = Uuid::new_v4();
    let likes = client.open_edges(EdgeKey::Like(missing)).await;
    let post = motionx_types::models::Post {
        id: missing,
        user_id: Uuid::new_v4(),
        content: None,
        image_url: None,
        video_url: None,
        created_at: chrono::Utc::now(),
    };

    let err = client.mutations(a.clone()).toggle_like(&post).await.unwrap_err();
    assert!(matches!(err, SyncError::Write { .. }));
    assert_eq!(err.to_string(), "Failed to update like");
    assert!(!likes.contains(a.id));
    assert_eq!(likes.count(), 0);
}

#[tokio::test]
async fn direct_image_shows_in_recipient_list() {
    let h = Harness::new();
    let (client_a, client_b) = (h.client(), h.client());
    let a = h.user(&client_a, "alice@example.com").await;
    let b = h.user(&client_b, "bob@example.com").await;

    let sent = client_a
        .conversations(a.id)
        .send_to(&client_a.mutations(a.clone()), b.id, None, Some(png(2 * 1024 * 1024)))
        .await
        .unwrap();
    assert_eq!(h.uploader.calls(), 1);

    let list = client_b.conversations(b.id).list().await;
    assert_eq!(list.len(), 1);
    let summary = &list[0];
    assert_eq!(summary.other.id, a.id);
    assert_eq!(summary.preview(), "");
    assert_eq!(summary.last_attachment(), sent.image_url.as_deref());
    assert!(summary.unread);
    assert_eq!(client_b.conversations(b.id).unread_count().await, 1);

    let view = client_b.open(Scope::Conversation(summary.conversation_id)).await;
    assert_eq!(view.len(), 1);
    let messages = client_b.store().direct_messages(summary.conversation_id);
    assert!(messages[0].image_url.is_some());

    client_b
        .conversations(b.id)
        .mark_read(summary.conversation_id)
        .await
        .unwrap();
    assert_eq!(client_b.conversations(b.id).unread_count().await, 0);
}

#[tokio::test]
async fn own_direct_message_renders_once() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;

    let conversation = client.conversations(a.id).start(b.id).await.unwrap();
    let view = client.open(Scope::Conversation(conversation)).await;

    let sent = client
        .mutations(a.clone())
        .send_direct_message(conversation, Some("see you at 6".into()), None)
        .await
        .unwrap();

    // Appended before the echo arrives
    assert!(client.store().contains(Scope::Conversation(conversation), sent.id));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(view.len(), 1);
}

#[tokio::test]
async fn room_message_reaches_the_other_session_once() {
    let h = Harness::new();
    let (one, two) = (h.client(), h.client());
    let a = h.user(&one, "alice@example.com").await;
    let b = h.user(&two, "bob@example.com").await;

    let room = one
        .mutations(a.clone())
        .create_room("Morning runs", None, false)
        .await
        .unwrap();
    assert_eq!(room.member_count, 1);

    let view_one = one.open(Scope::Room(room.id)).await;
    let view_two = two.open(Scope::Room(room.id)).await;
    two.mutations(b.clone()).toggle_membership(room.id).await.unwrap();

    one.mutations(a.clone())
        .send_room_message(room.id, Some("hello".into()), None)
        .await
        .unwrap();

    eventually(|| view_two.len() == 1).await;
    eventually(|| view_one.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = two.store().room_messages(room.id);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].content.as_deref(), Some("hello"));
    let refreshed = h.backend.get_room(room.id).await.unwrap().unwrap();
    assert_eq!(refreshed.member_count, 2);
}

#[tokio::test]
async fn closed_dms_block_before_any_write() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;

    client
        .mutations(b.clone())
        .update_settings(
            ProfileSettings {
                allow_dm_from: Some(DmPolicy::None),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    // A fresh client has no cached copy of b's old settings
    let fresh = h.client();
    let err = fresh
        .conversations(a.id)
        .send_to(&fresh.mutations(a.clone()), b.id, Some("hi".into()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PolicyBlocked(_)));

    assert!(h.backend.find_conversation(a.id, b.id).await.unwrap().is_none());
    assert!(h.backend.list_participations(a.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn followers_only_dms_need_a_follow() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;
    client
        .mutations(b.clone())
        .update_settings(
            ProfileSettings {
                allow_dm_from: Some(DmPolicy::Followers),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    let sender = h.client();
    let conversations = sender.conversations(a.id);
    assert!(matches!(
        conversations.can_message(b.id).await,
        Err(SyncError::PolicyBlocked(_))
    ));

    sender.mutations(a.clone()).toggle_follow(b.id).await.unwrap();
    assert!(conversations.can_message(b.id).await.is_ok());
}

#[tokio::test]
async fn follow_counts_and_conversation_lookup() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;
    client.mutations(a.clone()).toggle_follow(b.id).await.unwrap();

    let loader = client.loader();
    assert_eq!(loader.follow_counts(a.id).await, (0, 1));
    assert_eq!(loader.follow_counts(b.id).await, (1, 0));

    let conversations = client.conversations(a.id);
    assert_eq!(conversations.find(b.id).await, None);
    let id = conversations.start(b.id).await.unwrap();
    assert_eq!(conversations.find(b.id).await, Some(id));
    assert_eq!(client.conversations(b.id).find(a.id).await, Some(id));
}

#[tokio::test]
async fn oversized_attachment_writes_nothing() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let room = client
        .mutations(a.clone())
        .create_room("Lifting", None, false)
        .await
        .unwrap();

    let err = client
        .mutations(a.clone())
        .send_room_message(room.id, None, Some(png(10 * 1024 * 1024 + 1)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Validation(ValidationError::TooLarge { .. })
    ));
    assert_eq!(h.uploader.calls(), 0);
    assert!(h.backend.list_room_messages(room.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_first_visits_create_one_profile() {
    let h = Harness::new();
    let (one, two) = (h.client(), h.client());
    let auth = AuthUser {
        id: Uuid::new_v4(),
        email: Some("casey@example.com".into()),
    };

    let (one_sessions, two_sessions) = (one.sessions(), two.sessions());
    let (first, second) = tokio::join!(
        one_sessions.ensure_profile(&auth),
        two_sessions.ensure_profile(&auth)
    );
    let (first, first_created) = first.unwrap();
    let (second, second_created) = second.unwrap();

    assert_eq!(first, second);
    assert!(first_created ^ second_created);
    let rows = h
        .backend
        .search_profiles("casey".into(), Uuid::nil(), 20)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn missing_session_redirects_to_login() {
    let h = Harness::new();
    let outcome = h.client().sessions().resolve(None).await.unwrap();
    assert_eq!(
        outcome,
        motionx_sync::SessionOutcome::Redirect(motionx_sync::session::LOGIN_PATH)
    );
}

#[tokio::test]
async fn taken_username_gets_a_suffix() {
    let h = Harness::new();
    let client = h.client();
    let first = h.user(&client, "sam@gym.example").await;
    let second = h.user(&client, "sam@run.example").await;

    assert_eq!(first.username, "sam");
    assert!(second.username.starts_with("sam_"));
}

#[tokio::test]
async fn likes_and_comments_notify_the_owner_only() {
    let h = Harness::new();
    let client = h.client();
    let owner = h.user(&client, "owner@example.com").await;
    let fan = h.user(&client, "fan@example.com").await;

    let post = client
        .mutations(owner.clone())
        .create_post(PostDraft {
            content: Some("new pb".into()),
            attachment: None,
        })
        .await
        .unwrap();

    // Self-like is silent
    client.mutations(owner.clone()).toggle_like(&post).await.unwrap();
    client.mutations(fan.clone()).toggle_like(&post).await.unwrap();
    client
        .mutations(fan.clone())
        .add_comment(&post, "huge")
        .await
        .unwrap();

    let inbox = client.open(Scope::Notifications(owner.id)).await;
    let kinds: Vec<NotificationKind> = client
        .store()
        .notifications(owner.id)
        .into_iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(inbox.len(), 2);
    assert!(kinds.contains(&NotificationKind::Like));
    assert!(kinds.contains(&NotificationKind::Comment));
    assert_eq!(client.loader().unread_notifications(owner.id).await, 2);

    client
        .mutations(owner.clone())
        .mark_all_notifications_read()
        .await
        .unwrap();
    assert_eq!(client.loader().unread_notifications(owner.id).await, 0);
    assert!(client.store().notifications(owner.id).iter().all(|n| n.is_read));
}

#[tokio::test]
async fn only_authors_and_admins_delete_comments() {
    let h = Harness::new();
    let client = h.client();
    let author = h.user(&client, "author@example.com").await;
    let stranger = h.user(&client, "stranger@example.com").await;

    let post = client
        .mutations(author.clone())
        .create_post(PostDraft {
            content: Some("form check?".into()),
            attachment: None,
        })
        .await
        .unwrap();
    let thread = client.open(Scope::Comments(post.id)).await;
    let comment = client
        .mutations(author.clone())
        .add_comment(&post, "be honest")
        .await
        .unwrap();
    assert_eq!(thread.len(), 1);

    assert!(matches!(
        client.mutations(stranger.clone()).delete_comment(&comment).await,
        Err(SyncError::Forbidden(_))
    ));
    assert_eq!(thread.len(), 1);

    let admin = motionx_types::models::Profile {
        is_admin: true,
        ..stranger
    };
    client.mutations(admin).delete_comment(&comment).await.unwrap();
    assert_eq!(thread.len(), 0);
    assert!(h.backend.get_comment(comment.id).await.unwrap().is_none());
}

#[tokio::test]
async fn private_followers_stay_hidden_from_others() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;

    client.mutations(a.clone()).toggle_follow(b.id).await.unwrap();
    client
        .mutations(b.clone())
        .update_settings(
            ProfileSettings {
                followers_private: Some(true),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    let loader = client.loader();
    assert!(matches!(
        loader.followers(b.id, a.id).await,
        Err(SyncError::PolicyBlocked(_))
    ));
    let own = loader.followers(b.id, b.id).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].id, a.id);
}

#[tokio::test]
async fn empty_conversation_hidden_unless_following() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let b = h.user(&client, "bob@example.com").await;

    client.conversations(a.id).start(b.id).await.unwrap();
    assert!(client.conversations(a.id).list().await.is_empty());

    client.mutations(a.clone()).toggle_follow(b.id).await.unwrap();
    let list = client.conversations(a.id).list().await;
    assert_eq!(list.len(), 1);
    assert!(list[0].last_message.is_none());
}

#[tokio::test]
async fn reels_feed_only_has_videos() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;
    let actions = client.mutations(a.clone());

    let reels = client.open(Scope::Reels).await;
    let feed = client.open(Scope::Feed).await;

    assert!(matches!(
        actions
            .create_reel("  ", motionx_sync::Attachment::new("c.mp4", "video/mp4", vec![1u8; 16]))
            .await,
        Err(SyncError::Validation(ValidationError::Empty(_)))
    ));

    actions
        .create_reel("tempo squats", motionx_sync::Attachment::new("c.mp4", "video/mp4", vec![1u8; 16]))
        .await
        .unwrap();
    actions
        .create_post(PostDraft {
            content: Some("rest day".into()),
            attachment: None,
        })
        .await
        .unwrap();

    eventually(|| feed.len() == 2).await;
    assert_eq!(reels.len(), 1);
}

#[tokio::test]
async fn blank_display_name_is_rejected_before_avatar_upload() {
    let h = Harness::new();
    let client = h.client();
    let a = h.user(&client, "alice@example.com").await;

    let result = client
        .mutations(a.clone())
        .update_settings(
            ProfileSettings {
                display_name: Some("   ".into()),
                ..Default::default()
            },
            Some(png(1024)),
        )
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Validation(ValidationError::Empty(_)))
    ));
    assert_eq!(h.uploader.calls(), 0);
    assert_eq!(h.backend.get_profile(a.id).await.unwrap(), Some(a));
}

#[tokio::test]
async fn deleted_comment_leaves_the_other_session_thread() {
    let h = Harness::new();
    let author_client = h.client();
    let reader_client = h.client();
    let author = h.user(&author_client, "author@example.com").await;

    let post = author_client
        .mutations(author.clone())
        .create_post(PostDraft {
            content: Some("new pr".into()),
            attachment: None,
        })
        .await
        .unwrap();
    let comment = author_client
        .mutations(author.clone())
        .add_comment(&post, "felt heavy")
        .await
        .unwrap();

    let thread = reader_client.open(Scope::Comments(post.id)).await;
    assert_eq!(thread.len(), 1);

    author_client
        .mutations(author.clone())
        .delete_comment(&comment)
        .await
        .unwrap();
    eventually(|| thread.is_empty()).await;
    assert!(reader_client.store().comments(post.id).is_empty());
}

#[tokio::test]
async fn inbox_follows_incoming_messages_and_reads() {
    let h = Harness::new();
    let (client_a, client_b) = (h.client(), h.client());
    let a = h.user(&client_a, "alice@example.com").await;
    let b = h.user(&client_b, "bob@example.com").await;

    let inbox = client_a.conversations(a.id).watch().await;
    assert!(inbox.conversations().is_empty());
    assert_eq!(inbox.unread(), 0);

    client_b
        .conversations(b.id)
        .send_to(&client_b.mutations(b.clone()), a.id, Some("rest day?".into()), None)
        .await
        .unwrap();

    eventually(|| inbox.unread() == 1 && inbox.conversations().len() == 1).await;
    let summary = inbox.conversations().remove(0);
    assert_eq!(summary.other.id, b.id);
    assert_eq!(summary.preview(), "rest day?");
    assert!(summary.unread);

    client_a
        .conversations(a.id)
        .mark_read(summary.conversation_id)
        .await
        .unwrap();
    eventually(|| inbox.unread() == 0).await;
    assert!(!inbox.conversations()[0].unread);
}
