//! Retrieval scenarios over a real indexed corpus: symbol rank, provider
//! isolation, scope filters, hybrid fusion, the intention cache, and the
//! mock reranker hook.

use pampax::indexing::indexer::{IndexOptions, Indexer};
use pampax::search::{SearchEngine, SearchScope};
use pampax::storage::ProjectLayout;
use pampax::{ChunkStore, EmbeddingProvider, EncryptMode, RerankMode, Settings};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn corpus() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
        dir.path().join("src/payments.js"),
        "\
/**\n * @pampa-intent: create stripe checkout session\n */\n\
function createCheckoutSession(cart, user) {\n    return stripe.checkout.sessions.create({ cart, user });\n}\n\n\
function refundPayment(chargeId) {\n    return stripe.refunds.create({ charge: chargeId });\n}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("src/auth.py"),
        "def login_user(username, password):\n    return session.create(username, password)\n\n\
def logout_user(token):\n    return session.destroy(token)\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("src/parser.rs"),
        "fn parse_manifest(bytes: &[u8]) -> Manifest {\n    decode_manifest(bytes)\n}\n",
    )
    .unwrap();
    dir
}

async fn index_with_mock(root: &Path) {
    let settings = Settings::default();
    let provider = EmbeddingProvider::create("mock", &settings).unwrap();
    let mut indexer = Indexer::new(ProjectLayout::new(root), settings, provider);
    indexer.index(IndexOptions::default()).await.unwrap();
}

fn engine(root: &Path) -> SearchEngine {
    engine_with(root, Settings::default())
}

fn engine_with(root: &Path, settings: Settings) -> SearchEngine {
    let layout = ProjectLayout::new(root);
    let store = ChunkStore::new(layout.chunks_dir(), EncryptMode::Off, None).unwrap();
    SearchEngine::new(layout, store, settings)
}

fn mock_provider() -> EmbeddingProvider {
    EmbeddingProvider::create("mock", &Settings::default()).unwrap()
}

#[tokio::test]
async fn literal_symbol_query_ranks_first() {
    let repo = corpus();
    index_with_mock(repo.path()).await;

    let engine = engine(repo.path());
    let provider = mock_provider();
    let response = engine
        .search("createCheckoutSession", 5, &provider, &SearchScope::default())
        .await;

    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.results[0].symbol, "createCheckoutSession");
    assert!(response.results[0].chunk_id.starts_with("src/payments.js:createCheckoutSession:"));
    assert!(response.results[0].code.as_deref().unwrap().contains("stripe.checkout"));
    assert!(response.results[0].score >= 0.0 && response.results[0].score <= 1.0);
}

#[tokio::test]
async fn provider_mismatch_is_invisible_not_wrong() {
    let repo = corpus();
    index_with_mock(repo.path()).await;

    // Searching under a provider the index was never built with must not
    // return chunks from the mock configuration.
    let settings = Settings {
        ollama_model: Some("nomic-embed-text".to_string()),
        ..Settings::default()
    };
    let other = EmbeddingProvider::create("ollama", &settings).unwrap();
    let engine = engine(repo.path());
    let response = engine
        .search("checkout", 5, &other, &SearchScope::default())
        .await;

    assert!(!response.success);
    assert_eq!(
        response.error.unwrap().code,
        pampax::FailureCode::NoChunksFound
    );
}

#[tokio::test]
async fn missing_database_is_a_structured_failure() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path());
    let provider = mock_provider();
    let response = engine
        .search("anything", 5, &provider, &SearchScope::default())
        .await;
    assert!(!response.success);
    let failure = response.error.unwrap();
    assert_eq!(failure.code, pampax::FailureCode::DatabaseNotFound);
    assert!(failure.message.contains("pampa.db"));
    assert!(!failure.suggestion.is_empty());
}

#[tokio::test]
async fn scope_filters_restrict_results() {
    let repo = corpus();
    index_with_mock(repo.path()).await;
    let engine = engine(repo.path());
    let provider = mock_provider();

    let py_only = SearchScope {
        lang: vec!["python".to_string()],
        ..SearchScope::default()
    };
    let response = engine.search("session user", 10, &provider, &py_only).await;
    assert!(response.success);
    assert!(response.results.iter().all(|r| r.lang == "python"));

    let glob_scope = SearchScope {
        path_glob: vec!["src/*.rs".to_string()],
        ..SearchScope::default()
    };
    let response = engine.search("parse manifest", 10, &provider, &glob_scope).await;
    assert!(response.success);
    assert!(response.results.iter().all(|r| r.file_path.ends_with(".rs")));

    let impossible = SearchScope {
        lang: vec!["haskell".to_string()],
        ..SearchScope::default()
    };
    let response = engine.search("anything", 10, &provider, &impossible).await;
    assert!(!response.success);
    assert_eq!(
        response.error.unwrap().code,
        pampax::FailureCode::NoRelevantMatches
    );
}

#[tokio::test]
async fn hybrid_results_carry_fusion_metadata() {
    let repo = corpus();
    index_with_mock(repo.path()).await;
    let engine = engine(repo.path());
    let provider = mock_provider();

    let response = engine
        .search("refund payment charge", 5, &provider, &SearchScope::default())
        .await;
    assert!(response.success);
    let top = &response.results[0];
    assert_eq!(top.symbol, "refundPayment");
    assert_eq!(top.search_type, "hybrid");
    assert!(top.hybrid_score.is_some());
    assert!(top.vector_rank.is_some());
    assert!(top.bm25_rank.is_some(), "lexical match should rank");

    // With hybrid off, ordering metadata stays pure vector.
    let vector_only = SearchScope {
        hybrid: false,
        ..SearchScope::default()
    };
    let response = engine
        .search("refund payment charge", 5, &provider, &vector_only)
        .await;
    assert!(response.success);
    assert!(response.results[0].hybrid_score.is_none());
    assert_eq!(response.results[0].search_type, "vector");
}

#[tokio::test]
async fn high_confidence_hits_learn_an_intention() {
    let repo = corpus();
    index_with_mock(repo.path()).await;
    let engine = engine(repo.path());
    let provider = mock_provider();

    // The @pampa-intent annotation matches this query, pushing the score
    // over the learning threshold.
    let first = engine
        .search("create stripe checkout session", 5, &provider, &SearchScope::default())
        .await;
    assert!(first.success);
    assert_eq!(first.results[0].symbol, "createCheckoutSession");
    assert!(
        first.results[0].score > 0.8,
        "score {} too low to learn",
        first.results[0].score
    );

    // The second identical query is served from the intention cache, ahead
    // of any vector candidate.
    let second = engine
        .search("create stripe checkout session", 5, &provider, &SearchScope::default())
        .await;
    assert!(second.success);
    assert_eq!(second.results[0].search_type, "intention");
    assert_eq!(second.results[0].sha, first.results[0].sha);

    // The same phrasing in Spanish lands on the identical cache key.
    let spanish = engine
        .search("crear stripe checkout sesion", 5, &provider, &SearchScope::default())
        .await;
    assert!(spanish.success);
    assert_eq!(spanish.results[0].search_type, "intention");
}

#[tokio::test]
async fn mock_reranker_orders_by_overlap_and_sets_ranks() {
    let repo = corpus();
    index_with_mock(repo.path()).await;

    let settings = Settings {
        mock_reranker_tests: true,
        ..Settings::default()
    };
    let engine = engine_with(repo.path(), settings);
    let provider = mock_provider();

    let scope = SearchScope {
        reranker: Some(RerankMode::Transformers),
        ..SearchScope::default()
    };
    let response = engine
        .search("refund payment charge", 5, &provider, &scope)
        .await;
    assert!(response.success);
    let top = &response.results[0];
    assert_eq!(top.search_type, "reranked");
    assert_eq!(top.reranker_rank, Some(1));
    assert!(top.reranker_score.is_some());
    assert_eq!(top.symbol, "refundPayment");
}

#[tokio::test]
async fn query_patterns_accumulate_for_analytics() {
    let repo = corpus();
    index_with_mock(repo.path()).await;
    let engine = engine(repo.path());
    let provider = mock_provider();

    for _ in 0..3 {
        engine
            .search("find PaymentService", 3, &provider, &SearchScope::default())
            .await;
    }

    let analytics = pampax::service::get_query_analytics(repo.path()).unwrap();
    let pattern = analytics
        .top_patterns
        .iter()
        .find(|p| p.pattern == "find <Service>")
        .expect("anonymized pattern recorded");
    assert!(pattern.frequency >= 3);
}
