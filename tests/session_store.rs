use std::collections::HashSet;
use std::sync::Arc;

use meshgpt::bridge::pipeline::PipelineSettings;
use meshgpt::bridge::{
    ChatMessage, ConversationId, InMemorySessionStore, InboundEvent, Role, SessionStore,
};
mod common;
use common::{fixture, RecordingTransport, ScriptedBackend, CADEN, ME};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_tasks_on_one_conversation_keep_history_consistent() {
    let store = Arc::new(InMemorySessionStore::new(ChatMessage::system("sys"), 8));
    let conv = ConversationId::channel(0);

    let mut handles = Vec::new();
    for t in 0..16 {
        let store = store.clone();
        let conv = conv.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..20 {
                let hist = store.append(&conv, ChatMessage::user(format!("{}:{}", t, i)));
                assert!(hist.len() <= 9);
                assert_eq!(hist[0].role, Role::System);
                tokio::task::yield_now().await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let hist = store.snapshot(&conv);
    assert_eq!(hist.len(), 9);
    let unique: HashSet<_> = hist[1..].iter().map(|m| m.content.clone()).collect();
    assert_eq!(unique.len(), 8);
}

#[tokio::test]
async fn long_dm_conversation_is_capped_at_system_plus_eight() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let f = fixture(backend.clone(), RecordingTransport::default(), PipelineSettings::default());

    for i in 0..10 {
        f.server
            .handle_event(InboundEvent::text(CADEN, ME, 0, &format!("q{}", i)))
            .await
            .expect("reply");
    }

    let hist = f.store.snapshot(&ConversationId::direct(CADEN));
    assert_eq!(hist.len(), 9);
    assert_eq!(hist[0].role, Role::System);
    // newest four exchanges survive: q6..q9 with their answers
    assert_eq!(hist[1].content, "Caden: q6");
    assert_eq!(hist[8].role, Role::Assistant);

    // the backend never saw more than the cap either
    let requests = backend.requests.lock().unwrap();
    assert!(requests.iter().all(|r| r.messages.len() <= 9));
}
