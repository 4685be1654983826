//! End-to-end tests for sessions, memory and cold backup.
//!
//! A wiremock server stands in for Ollama: `/api/embeddings` answers with a
//! deterministic bag-of-words vector for the prompt and `/api/chat` with a
//! canned reply, so the full stack runs without a model server.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use cintessa::backup::ColdBackup;
use cintessa::config::{Config, ServiceProvider};
use cintessa::memory::{reconcile, resolve_embedding_provider, MemoryStore, Role};
use cintessa::providers::{resolve_completion_provider, ChatMessage};
use cintessa::sessions::SessionStore;
use cintessa::{Error, PersistenceStage};

const DIMENSIONS: usize = 64;

// ============================================================================
// Mock Ollama
// ============================================================================

/// Embeds the request's `prompt` by hashing each lowercase word into one of
/// `DIMENSIONS` buckets.
struct WordHashEmbeddings;

fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMENSIONS as u64) as usize
}

impl Respond for WordHashEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let prompt = body["prompt"].as_str().unwrap_or_default().to_lowercase();

        let mut vector = vec![0.0f32; DIMENSIONS];
        for word in prompt.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            vector[bucket(word)] += 1.0;
        }
        ResponseTemplate::new(200).set_body_json(json!({ "embedding": vector }))
    }
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "test-model",
        "message": { "role": "assistant", "content": content },
        "done": true
    }))
}

async fn mount_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(WordHashEmbeddings)
        .mount(server)
        .await;
}

async fn mount_chat(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply(content))
        .mount(server)
        .await;
}

fn test_config(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.state_dir = dir.path().to_path_buf();
    config.completion.base_url = Some(server.uri());
    config.completion.timeout_secs = 1;
    config.embedding.base_url = Some(server.uri());
    config.embedding.timeout_secs = 1;
    config.embedding.cache.enabled = false;
    config.memory.db_path = Some(dir.path().join("memories.db").display().to_string());
    config.backup.dir = Some(dir.path().join("users").display().to_string());
    config
}

async fn embedding_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/api/embeddings")
        .count()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn memories_are_private_and_ranked() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    mount_chat(&server, "Noted.").await;

    let dir = TempDir::new().unwrap();
    let sessions = SessionStore::from_config(&test_config(&server, &dir))
        .await
        .unwrap();

    let alice = sessions.sign_in("Alice").await.unwrap();
    let bob = sessions.sign_in("bob").await.unwrap();

    let outcome = alice.send("I work as a nurse at night").await.unwrap();
    assert_eq!(outcome.reply, "Noted.");
    assert!(outcome.warnings.is_empty());
    bob.send("I coach the local football team").await.unwrap();

    let hits = alice.search("where do I work", Some(3)).await.unwrap();
    assert_eq!(hits[0].content, "I work as a nurse at night");
    assert_eq!(hits[0].role, Role::User);
    assert!(hits.iter().all(|h| !h.content.contains("football")));
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

    let hits = bob.search("what sport do I coach", None).await.unwrap();
    assert_eq!(hits[0].content, "I coach the local football team");
    assert!(hits.iter().all(|h| !h.content.contains("nurse")));
}

#[tokio::test]
async fn completion_timeout_leaves_no_trace() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply("too slow").set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, &dir);
    let sessions = SessionStore::from_config(&config).await.unwrap();
    let session = sessions.sign_in("alice").await.unwrap();
    let before = sessions.services().backup.load("alice").await.unwrap();

    let err = session.send("hello?").await.unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable { .. }), "{err}");

    assert!(session.history().await.unwrap().is_empty());
    assert_eq!(sessions.services().memory.count("alice").await.unwrap(), 0);
    assert_eq!(sessions.services().backup.load("alice").await.unwrap(), before);
    assert_eq!(embedding_calls(&server).await, 0);
}

#[tokio::test]
async fn embedding_outage_is_partial_persistence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .mount(&server)
        .await;
    mount_chat(&server, "I'll remember that.").await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, &dir);
    let sessions = SessionStore::from_config(&config).await.unwrap();
    let session = sessions.sign_in("alice").await.unwrap();

    let outcome = session.send("my dog is called Rex").await.unwrap();
    assert_eq!(outcome.reply, "I'll remember that.");

    let stages: Vec<PersistenceStage> = outcome.warnings.iter().map(|w| w.stage).collect();
    assert_eq!(
        stages,
        vec![PersistenceStage::UserMemory, PersistenceStage::AssistantMemory]
    );
    for warning in &outcome.warnings {
        match &warning.error {
            Error::EmbeddingFailed(inner) => {
                assert!(matches!(**inner, Error::ServiceUnavailable { .. }))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    let backup = ColdBackup::from_config(&config);
    let saved = backup.load("alice").await.unwrap().unwrap();
    assert_eq!(saved.messages.len(), 2);
    assert_eq!(saved.messages[0].content, "my dog is called Rex");

    // Once the embedding service is back, reconciliation fills the gap.
    server.reset().await;
    mount_embeddings(&server).await;

    let store = &sessions.services().memory;
    let report = reconcile(store, &backup, "alice").await.unwrap();
    assert_eq!((report.examined, report.appended, report.failed), (2, 2, 0));
    assert_eq!(store.count("alice").await.unwrap(), 2);
}

#[tokio::test]
async fn non_positive_limit_makes_no_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(WordHashEmbeddings)
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, &dir);
    let embedder = resolve_embedding_provider(&config.embedding).unwrap();
    let store = MemoryStore::from_config(&config, embedder).unwrap();

    for limit in [0, -1] {
        let err = store.search("alice", "anything", limit).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
    server.verify().await;
}

#[tokio::test]
async fn conversation_survives_restart() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    mount_chat(&server, "Nice to meet you, Zoë.").await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, &dir);

    {
        let sessions = SessionStore::from_config(&config).await.unwrap();
        let session = sessions.sign_in("zoe").await.unwrap();
        session.send("Hi, I'm Zoë").await.unwrap();
        assert!(sessions.sign_out("zoe").await.unwrap());
    }

    let sessions = SessionStore::from_config(&config).await.unwrap();
    let session = sessions.sign_in("ZOE").await.unwrap();
    let history = session.history().await.unwrap();

    let lines: Vec<(Role, &str)> = history.iter().map(|m| (m.role, m.content.as_str())).collect();
    assert_eq!(
        lines,
        vec![
            (Role::User, "Hi, I'm Zoë"),
            (Role::Assistant, "Nice to meet you, Zoë.")
        ]
    );
    assert_eq!(sessions.services().memory.count("zoe").await.unwrap(), 2);
}

#[tokio::test]
async fn one_user_never_sees_another_users_memories() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    mount_chat(&server, "Sounds lovely.").await;

    let dir = TempDir::new().unwrap();
    let sessions = SessionStore::from_config(&test_config(&server, &dir))
        .await
        .unwrap();

    let alice = sessions.sign_in("alice").await.unwrap();
    alice.send("I love hiking in the Alps").await.unwrap();

    let hits = alice.search("hiking in the Alps", Some(3)).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].content, "I love hiking in the Alps");

    let memory = &sessions.services().memory;
    assert!(memory.search("bob", "mountains", 5).await.unwrap().is_empty());

    let bob = sessions.sign_in("bob").await.unwrap();
    bob.send("I prefer the seaside").await.unwrap();
    let hits = bob.search("mountains", None).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| !h.content.contains("Alps")));
}

#[tokio::test]
async fn ollama_reply_without_message_aborts_turn() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let sessions = SessionStore::from_config(&test_config(&server, &dir))
        .await
        .unwrap();
    let session = sessions.sign_in("alice").await.unwrap();

    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, Error::MalformedResponse { .. }), "{err}");
    assert!(session.history().await.unwrap().is_empty());
    assert_eq!(sessions.services().memory.count("alice").await.unwrap(), 0);
    assert_eq!(embedding_calls(&server).await, 0);
}

#[tokio::test]
async fn ollama_embedding_without_vector_is_partial_persistence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    mount_chat(&server, "Got it.").await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, &dir);
    let sessions = SessionStore::from_config(&config).await.unwrap();
    let session = sessions.sign_in("alice").await.unwrap();

    let outcome = session.send("remember my locker code").await.unwrap();
    assert_eq!(outcome.reply, "Got it.");
    assert_eq!(outcome.warnings.len(), 2);
    for warning in &outcome.warnings {
        match &warning.error {
            Error::EmbeddingFailed(inner) => {
                assert!(matches!(**inner, Error::MalformedResponse { .. }), "{inner}")
            }
            other => panic!("unexpected error {other}"),
        }
    }

    let saved = ColdBackup::from_config(&config).load("alice").await.unwrap().unwrap();
    assert_eq!(saved.messages.len(), 2);
    assert_eq!(sessions.services().memory.count("alice").await.unwrap(), 0);
}

// ============================================================================
// OpenAI-compatible services
// ============================================================================

fn openai_config(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = test_config(server, dir);
    config.completion.provider = ServiceProvider::Openai;
    config.completion.api_key = Some("sk-test".to_string());
    config.embedding.provider = ServiceProvider::Openai;
    config.embedding.api_key = Some("sk-test".to_string());
    config
}

#[tokio::test]
async fn openai_services_carry_a_full_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello from OpenAI." } }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.6, 0.8] }]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let sessions = SessionStore::from_config(&openai_config(&server, &dir))
        .await
        .unwrap();
    let session = sessions.sign_in("alice").await.unwrap();

    let outcome = session.send("hi").await.unwrap();
    assert_eq!(outcome.reply, "Hello from OpenAI.");
    assert!(outcome.warnings.is_empty());
    assert_eq!(sessions.services().memory.count("alice").await.unwrap(), 2);

    let requests = server.received_requests().await.unwrap_or_default();
    let embed: Value = requests
        .iter()
        .find(|r| r.url.path() == "/embeddings")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    assert_eq!(embed["input"], json!(["hi"]));
}

#[tokio::test]
async fn openai_empty_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = openai_config(&server, &dir);
    let completion = resolve_completion_provider(&config.completion).unwrap();

    let err = completion
        .complete(&[ChatMessage::user("hi")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse { .. }), "{err}");
}

#[tokio::test]
async fn openai_empty_data_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = openai_config(&server, &dir);
    let embedder = resolve_embedding_provider(&config.embedding).unwrap();

    let err = embedder.embed("hello").await.unwrap_err();
    assert!(matches!(err, Error::MalformedResponse { .. }), "{err}");
}

#[test]
fn openai_without_api_key_is_rejected() {
    let mut config = Config::default();
    config.completion.provider = ServiceProvider::Openai;
    config.embedding.provider = ServiceProvider::Openai;

    assert!(matches!(
        resolve_completion_provider(&config.completion),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        resolve_embedding_provider(&config.embedding),
        Err(Error::InvalidArgument(_))
    ));
}
