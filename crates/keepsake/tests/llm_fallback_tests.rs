//! LLM fallback extraction against a mocked OpenAI-compatible endpoint

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keepsake::MemoryManager;
use keepsake::config::LlmConfig;
use keepsake::llm::RemoteLlm;
use keepsake::manager::{RememberAction, RememberOptions};
use keepsake::memory::{EntityType, MemoryType, meta};
use keepsake::storage::InMemoryStore;
use keepsake::testing::MockEmbedder;

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {
                "content": content
            }
        }]
    })
}

fn manager_for(server: &MockServer, retries: u32) -> MemoryManager {
    let config = LlmConfig {
        enabled: true,
        api_url: server.uri(),
        max_retries: retries,
        ..LlmConfig::default()
    };
    let llm = RemoteLlm::with_api_key(&config, "test-key").unwrap();

    MemoryManager::builder(Arc::new(InMemoryStore::new()))
        .with_embedder(Arc::new(MockEmbedder::new(32)))
        .with_llm(Arc::new(llm))
        .build()
}

#[tokio::test]
async fn test_unmatched_message_is_extracted_by_llm() {
    let server = MockServer::start().await;
    let response = r#"```json
{
  "memories": [
    {"type": "preference", "category": "location", "content": "Prefers schools near the ocean", "importance": 0.7}
  ],
  "entities": [
    {"type": "school", "name": "UC San Diego", "description": "Coastal campus the student mentioned"}
  ]
}
```"#;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(response)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server, 0);
    let report = manager
        .remember_message(
            "student",
            "Honestly I'd love a campus like UC San Diego, close to the beach",
            RememberOptions::default(),
        )
        .await
        .unwrap();

    assert!(report.stats.llm_invoked);
    assert_eq!(report.stats.rule_matches, 0);
    assert_eq!(report.count(RememberAction::Created), 1);

    let memory = report.outcomes[0].memory.as_ref().unwrap();
    assert_eq!(memory.memory_type, MemoryType::Preference);
    assert_eq!(memory.category, "location");
    assert_eq!(memory.metadata.get(meta::SOURCE).unwrap(), "llm");

    let entities = manager.list_entities("student").await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].entity_type, EntityType::School);
    assert_eq!(entities[0].name, "UC San Diego");
}

#[tokio::test]
async fn test_llm_outage_degrades_to_rules() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let manager = manager_for(&server, 0);
    let report = manager
        .remember_message("student", "我的 GPA 是 3.8/4.0", RememberOptions::default())
        .await
        .unwrap();

    assert!(report.stats.llm_invoked);
    assert_eq!(report.stats.llm_candidates, 0);
    assert_eq!(report.count(RememberAction::Created), 1);
    assert_eq!(
        report.outcomes[0].memory.as_ref().unwrap().content,
        "GPA: 3.80"
    );
}

#[tokio::test]
async fn test_unparseable_llm_output_yields_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("I could not find anything.")),
        )
        .mount(&server)
        .await;

    let manager = manager_for(&server, 0);
    let report = manager
        .remember_message("student", "Thanks, that is all for today", RememberOptions::default())
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(manager.get_stats("student").await.unwrap().total, 0);
}
