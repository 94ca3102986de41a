//! AI tagging against mock chat backends.

use link_preserver::db::{
    get_link, get_tags_for_link, get_user, insert_link, insert_user, upsert_tag_by_name,
    AiTaggingMethod, Database, NewLink, NewUser, User,
};
use link_preserver::tagging::{AutoTagger, TagProvider};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

async fn seed(db: &Database, user: NewUser) -> (User, i64) {
    let owner_id = insert_user(db.pool(), &user).await.unwrap();
    let link_id = insert_link(
        db.pool(),
        &NewLink {
            collection_id: 1,
            owner_id,
            name: "Fearless concurrency".to_string(),
            url: Some("https://blog.example.com/concurrency".to_string()),
        },
    )
    .await
    .unwrap();
    let owner = get_user(db.pool(), owner_id).await.unwrap().unwrap();
    (owner, link_id)
}

async fn tag_names(db: &Database, link_id: i64) -> Vec<String> {
    get_tags_for_link(db.pool(), link_id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect()
}

#[tokio::test]
async fn test_openai_existing_tags_only() {
    let (db, _temp_dir) = setup_db().await;
    let (owner, link_id) = seed(
        &db,
        NewUser {
            ai_tagging_method: AiTaggingMethod::Existing,
            ..NewUser::default()
        },
    )
    .await;
    for name in ["Rust", "Databases"] {
        upsert_tag_by_name(db.pool(), owner.id, name).await.unwrap();
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "[\"rust\", \"concurrency\"]" }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tagger = AutoTagger::new(
        Some(TagProvider::OpenAiCompatible {
            base_url: server.uri(),
            api_key: "sk-test".to_string(),
        }),
        "gpt-4o-mini",
    );
    tagger
        .tag_link(db.pool(), &owner, link_id, Some("Threads without data races"))
        .await
        .unwrap();

    // Only the existing tag survives, in its stored spelling.
    assert_eq!(tag_names(&db, link_id).await, vec!["Rust"]);
    assert!(get_link(db.pool(), link_id).await.unwrap().unwrap().ai_tagged);
}

#[tokio::test]
async fn test_ollama_generates_new_tags() {
    let (db, _temp_dir) = setup_db().await;
    let (owner, link_id) = seed(
        &db,
        NewUser {
            ai_tagging_method: AiTaggingMethod::Generate,
            ..NewUser::default()
        },
    )
    .await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "role": "assistant", "content": "Tags: [\"Rust\", \"threads\", \"rust\"]" },
            "done": true
        })))
        .mount(&server)
        .await;

    let tagger = AutoTagger::new(
        Some(TagProvider::Ollama {
            endpoint: server.uri(),
        }),
        "llama3",
    );
    tagger.tag_link(db.pool(), &owner, link_id, None).await.unwrap();

    assert_eq!(tag_names(&db, link_id).await, vec!["rust", "threads"]);
}

#[tokio::test]
async fn test_predefined_without_candidates_skips_request() {
    let (db, _temp_dir) = setup_db().await;
    let (owner, link_id) = seed(
        &db,
        NewUser {
            ai_tagging_method: AiTaggingMethod::Predefined,
            ..NewUser::default()
        },
    )
    .await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let tagger = AutoTagger::new(
        Some(TagProvider::Ollama {
            endpoint: server.uri(),
        }),
        "llama3",
    );
    tagger.tag_link(db.pool(), &owner, link_id, None).await.unwrap();

    assert!(tag_names(&db, link_id).await.is_empty());
    assert!(!get_link(db.pool(), link_id).await.unwrap().unwrap().ai_tagged);
}

#[tokio::test]
async fn test_backend_error_propagates() {
    let (db, _temp_dir) = setup_db().await;
    let (owner, link_id) = seed(
        &db,
        NewUser {
            ai_tagging_method: AiTaggingMethod::Generate,
            ..NewUser::default()
        },
    )
    .await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let tagger = AutoTagger::new(
        Some(TagProvider::OpenAiCompatible {
            base_url: server.uri(),
            api_key: "sk-test".to_string(),
        }),
        "gpt-4o-mini",
    );
    assert!(tagger
        .tag_link(db.pool(), &owner, link_id, None)
        .await
        .is_err());
    assert!(!get_link(db.pool(), link_id).await.unwrap().unwrap().ai_tagged);
}

#[tokio::test]
async fn test_no_provider_is_a_noop() {
    let (db, _temp_dir) = setup_db().await;
    let (owner, link_id) = seed(
        &db,
        NewUser {
            ai_tagging_method: AiTaggingMethod::Generate,
            ..NewUser::default()
        },
    )
    .await;

    AutoTagger::new(None, "gpt-4o-mini")
        .tag_link(db.pool(), &owner, link_id, None)
        .await
        .unwrap();
    assert!(tag_names(&db, link_id).await.is_empty());
}
