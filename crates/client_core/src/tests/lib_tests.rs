use super::*;
use crate::test_support::{next_peer, session, FakeChatApi, MemoryConnector};
use shared::domain::ConversationId;

fn client(api: Arc<FakeChatApi>, connector: Arc<MemoryConnector>) -> ChatClient {
    ChatClient::with_dependencies(
        session(1, "alice"),
        api,
        connector,
        ReconnectPolicy::Disabled,
    )
}

#[tokio::test]
async fn search_users_filters_case_insensitively() {
    let (connector, _peers) = MemoryConnector::new();
    let client = client(FakeChatApi::with_history(Vec::new()), connector);

    let found = client.search_users("BO").await.expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].username, "bob");

    let everyone = client.search_users("  ").await.expect("search");
    assert_eq!(everyone.len(), 2);

    assert!(client.search_users("zed").await.expect("search").is_empty());
}

#[tokio::test]
async fn start_conversation_returns_new_thread() {
    let (connector, _peers) = MemoryConnector::new();
    let client = client(FakeChatApi::with_history(Vec::new()), connector);

    let conversation = client
        .start_conversation(UserId(2))
        .await
        .expect("conversation");

    assert_eq!(conversation.id, ConversationId(77));
    assert_eq!(
        conversation
            .counterpart(client.session().user_id())
            .map(|user| user.id),
        Some(UserId(2))
    );
    assert_eq!(conversation.preview(), "No messages yet");
}

#[tokio::test]
async fn open_thread_shares_session_and_transport() {
    let (connector, mut peers) = MemoryConnector::new();
    let client = client(FakeChatApi::with_history(Vec::new()), connector);

    let thread = client.open_thread();
    assert_eq!(thread.local_user_id(), UserId(1));

    thread.connect(ConversationId(77)).await.expect("connect");
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.conversation_id, ConversationId(77));

    thread
        .send(ConversationId(77), "hello bob")
        .await
        .expect("sent");
    let raw = peer.next_sent().await.expect("outbound frame");
    assert!(raw.contains("hello bob"));

    thread.disconnect().await;
}

#[tokio::test]
async fn threads_are_independent() {
    let (connector, mut peers) = MemoryConnector::new();
    let client = client(FakeChatApi::with_history(Vec::new()), connector);

    let first = client.open_thread();
    let second = client.open_thread();
    first.connect(ConversationId(1)).await.expect("connect");
    let _peer = next_peer(&mut peers).await;

    first.send(ConversationId(1), "only here").await.expect("sent");

    assert_eq!(first.display_list().await.len(), 1);
    assert!(second.display_list().await.is_empty());
    assert!(!second.is_connected().await);
}

#[test]
fn rejects_settings_without_usable_ws_url() {
    let settings = ClientSettings {
        api_base_url: "ftp://example.com/api".into(),
        ..ClientSettings::default()
    };
    assert!(ChatClient::new(&settings, session(1, "alice")).is_err());
}

#[tokio::test]
async fn session_manager_reads_configured_token_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = ClientSettings {
        token_path: dir.path().join("session.json"),
        ..ClientSettings::default()
    };
    let stored = session(5, "erin");
    FileTokenStore::new(settings.token_path.clone())
        .save(&stored)
        .await
        .expect("save");

    let manager = session_manager(&settings);
    assert_eq!(manager.restore().await, Some(stored));
}
