use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use rag_files::batch::{run_preindex, BatchRequest};
use rag_files::catalog::DocumentKind;
use rag_files::chat;
use rag_files::config::Config;
use rag_files::embedding::Embedder;
use rag_files::error::RagError;
use rag_files::indexer::{IndexManager, CATEGORY_DIR};
use rag_files::llm::LanguageModel;
use rag_files::loader::{DocumentLoader, Section};
use rag_files::manifest::{read_manifest, ManifestStatus, MANIFEST_FILE};
use rag_files::models::ScoredChunk;
use rag_files::query::{self, QueryOptions};
use rag_files::sanitize::is_valid_identifier;
use rag_files::store::{read_meta, VectorStore, META_FILE};

// ============ Stubs ============

/// Letter-frequency embeddings; counts calls and can be told to fail.
#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("embedding provider unavailable");
        }
        Ok(texts.iter().map(|t| letters(t)).collect())
    }
}

fn letters(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 27];
    v[26] = 0.1;
    for c in text.to_ascii_lowercase().bytes() {
        if c.is_ascii_lowercase() {
            v[(c - b'a') as usize] += 1.0;
        }
    }
    v
}

/// Reads every format as UTF-8 and counts calls.
#[derive(Default)]
struct CountingLoader {
    calls: AtomicUsize,
}

impl DocumentLoader for CountingLoader {
    fn load(&self, path: &Path, _kind: DocumentKind) -> Result<Vec<Section>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Section {
            text: fs::read_to_string(path)?,
            page: None,
        }])
    }
}

/// Answers only when given at least `min_context` chunks.
struct ThresholdModel {
    min_context: usize,
    calls: AtomicUsize,
}

impl ThresholdModel {
    fn new(min_context: usize) -> Self {
        Self {
            min_context,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for ThresholdModel {
    fn model_name(&self) -> &str {
        "threshold"
    }

    async fn generate(&self, _question: &str, context: &[ScoredChunk]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if context.len() >= self.min_context {
            Ok(format!("answer from {} chunks", context.len()))
        } else {
            Ok(String::new())
        }
    }
}

// ============ Fixture ============

struct Env {
    _tmp: TempDir,
    docs: std::path::PathBuf,
    index: std::path::PathBuf,
    embedder: Arc<CountingEmbedder>,
    loader: Arc<CountingLoader>,
    manager: IndexManager,
}

fn setup(files: &[(&str, &str)]) -> Env {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    let index = tmp.path().join("db");
    fs::create_dir_all(&docs).unwrap();
    for (name, content) in files {
        write_doc(&docs, name, content);
    }

    let mut cfg = Config::minimal();
    cfg.paths.docs_dir = docs.clone();
    cfg.paths.index_dir = index.clone();

    let embedder = Arc::new(CountingEmbedder::default());
    let loader = Arc::new(CountingLoader::default());
    let manager = IndexManager::new(&cfg, embedder.clone(), loader.clone());

    Env {
        _tmp: tmp,
        docs,
        index,
        embedder,
        loader,
        manager,
    }
}

fn write_doc(docs: &Path, name: &str, content: &str) {
    let path = docs.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn loads(env: &Env) -> usize {
    env.loader.calls.load(Ordering::SeqCst)
}

fn embeds(env: &Env) -> usize {
    env.embedder.calls.load(Ordering::SeqCst)
}

const PUMP: &str = "The pump must be serviced every 500 hours.\n\n\
Replace the seal kit when vibration exceeds the limit.\n\n\
Torque for the impeller bolt is 45 Nm.";

// ============ File index lifecycle ============

#[tokio::test]
async fn test_first_call_builds_and_writes_manifest() {
    let env = setup(&[("pump.txt", PUMP)]);
    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();

    assert!(handle.rebuilt);
    assert_eq!(handle.identifier, "pump");
    assert_eq!(handle.collection, "my_rag_db_pump");
    assert_eq!(handle.dir, env.index.join("pump"));
    assert!(handle.store.len() > 0);
    assert_eq!(handle.meta.model, "letters");

    match read_manifest(&handle.dir) {
        ManifestStatus::Valid(m) => {
            assert_eq!(m.len(), 1);
            assert_eq!(m.files[0].name, "pump.txt");
            assert_eq!(m.files[0].size, PUMP.len() as u64);
        }
        other => panic!("expected a valid manifest, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unchanged_document_is_not_reloaded() {
    let env = setup(&[("pump.txt", PUMP)]);

    let first = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(first.rebuilt);
    assert_eq!(loads(&env), 1);
    let embed_calls = embeds(&env);
    assert!(embed_calls >= 1);

    let second = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(!second.rebuilt);
    assert_eq!(loads(&env), 1, "second call must not invoke the loader");
    assert_eq!(embeds(&env), embed_calls, "second call must not invoke the embedder");
    assert_eq!(second.store.len(), first.store.len());
    assert_eq!(second.store.chunks(), first.store.chunks());
}

#[tokio::test]
async fn test_force_always_rebuilds() {
    let env = setup(&[("pump.txt", PUMP)]);
    env.manager.ensure_file_index("pump.txt", false).await.unwrap();

    let forced = env.manager.ensure_file_index("pump.txt", true).await.unwrap();
    assert!(forced.rebuilt);
    assert_eq!(loads(&env), 2);

    let again = env.manager.ensure_file_index("pump.txt", true).await.unwrap();
    assert!(again.rebuilt);
    assert_eq!(loads(&env), 3);
}

#[tokio::test]
async fn test_changed_document_is_rebuilt() {
    let env = setup(&[("pump.txt", PUMP)]);
    env.manager.ensure_file_index("pump.txt", false).await.unwrap();

    write_doc(&env.docs, "pump.txt", &format!("{}\n\nNew maintenance note.", PUMP));
    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(handle.rebuilt);
    assert_eq!(loads(&env), 2);
    assert!(handle
        .store
        .chunks()
        .iter()
        .any(|c| c.text.contains("New maintenance note")));
}

#[tokio::test]
async fn test_corrupt_manifest_forces_rebuild() {
    let env = setup(&[("pump.txt", PUMP)]);
    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();

    fs::write(handle.dir.join(MANIFEST_FILE), "{ not json").unwrap();
    assert!(matches!(read_manifest(&handle.dir), ManifestStatus::Corrupt(_)));

    let rebuilt = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(rebuilt.rebuilt);
    assert!(matches!(read_manifest(&rebuilt.dir), ManifestStatus::Valid(_)));
}

#[tokio::test]
async fn test_absurd_index_meta_forces_rebuild() {
    let env = setup(&[("pump.txt", PUMP)]);
    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();

    let mut meta = read_meta(&handle.dir).unwrap();
    meta.dims = usize::MAX / 2;
    fs::write(handle.dir.join(META_FILE), serde_json::to_string(&meta).unwrap()).unwrap();

    let rebuilt = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(rebuilt.rebuilt);
    assert_eq!(rebuilt.meta.dims, 27);
    assert_eq!(loads(&env), 2);
}

#[tokio::test]
async fn test_model_change_forces_rebuild() {
    let env = setup(&[("pump.txt", PUMP)]);
    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();

    let mut meta = read_meta(&handle.dir).unwrap();
    meta.model = "text-embedding-3-small".to_string();
    fs::write(handle.dir.join(META_FILE), serde_json::to_string(&meta).unwrap()).unwrap();

    let rebuilt = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(rebuilt.rebuilt);
    assert_eq!(rebuilt.meta.model, "letters");

    let reused = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(!reused.rebuilt);
}

#[tokio::test]
async fn test_failed_build_leaves_no_manifest_and_recovers() {
    let env = setup(&[("pump.txt", PUMP)]);
    env.embedder.fail.store(true, Ordering::SeqCst);

    let err = env.manager.ensure_file_index("pump.txt", false).await.unwrap_err();
    assert!(matches!(err, RagError::IndexBuild { .. }));
    assert!(err.to_string().contains("pump.txt"));
    assert!(!env.index.join("pump").join(MANIFEST_FILE).exists());

    env.embedder.fail.store(false, Ordering::SeqCst);
    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(handle.rebuilt);
    assert!(handle.dir.join(MANIFEST_FILE).exists());
}

#[tokio::test]
async fn test_stray_files_without_manifest_are_rebuilt() {
    let env = setup(&[("pump.txt", PUMP)]);
    let dir = env.index.join("pump");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("leftover.bin"), [1u8, 2, 3]).unwrap();

    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    assert!(handle.rebuilt);
    assert!(!dir.join("leftover.bin").exists());
}

#[tokio::test]
async fn test_empty_document_is_build_error() {
    let env = setup(&[("blank.txt", "   \n\n  ")]);
    let err = env.manager.ensure_file_index("blank.txt", false).await.unwrap_err();
    assert!(matches!(err, RagError::IndexBuild { .. }));
    assert_eq!(embeds(&env), 0);
}

#[tokio::test]
async fn test_unknown_unsupported_and_artifact_keys_not_found() {
    let env = setup(&[
        ("re port.md", PUMP),
        ("re:port.md", PUMP),
        ("notes.docx", PUMP),
        ("setup.pdf:Zone.Identifier", "[ZoneTransfer]"),
    ]);

    for key in ["missing.txt", "notes.docx", "re:port.md", "setup.pdf:Zone.Identifier"] {
        let err = env.manager.ensure_file_index(key, false).await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)), "{} gave {:?}", key, err);
    }
    assert_eq!(loads(&env), 0);

    assert_eq!(env.manager.list_files().unwrap(), vec!["re port.md"]);
    let handle = env.manager.ensure_file_index("re port.md", false).await.unwrap();
    assert_eq!(handle.identifier, "re_port");
}

#[tokio::test]
async fn test_empty_key_is_validation_error() {
    let env = setup(&[("pump.txt", PUMP)]);
    let err = env.manager.ensure_file_index("  ", false).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
}

#[tokio::test]
async fn test_colliding_names_get_separate_directories() {
    let env = setup(&[("re port.md", PUMP), ("re_port.txt", "Different content about valves.")]);

    let a = env.manager.ensure_file_index("re port.md", false).await.unwrap();
    let b = env.manager.ensure_file_index("re_port.txt", false).await.unwrap();

    assert_ne!(a.identifier, b.identifier);
    assert_ne!(a.dir, b.dir);
    assert!(a.identifier.starts_with("re_port-"));
    assert!(b.identifier.starts_with("re_port-"));
    assert!(is_valid_identifier(&a.identifier));
    assert!(is_valid_identifier(&b.identifier));

    let again = env.manager.ensure_file_index("re port.md", false).await.unwrap();
    assert_eq!(again.identifier, a.identifier);
    assert!(!again.rebuilt);
}

#[tokio::test]
async fn test_new_collision_moves_existing_document() {
    // Adding a colliding file renames the first document's identifier, so
    // its earlier index directory is no longer used.
    let env = setup(&[("guide.pdf", PUMP)]);
    let before = env.manager.ensure_file_index("guide.pdf", false).await.unwrap();
    assert_eq!(before.identifier, "guide");

    write_doc(&env.docs, "guide.md", "Markdown guide.");
    let after = env.manager.ensure_file_index("guide.pdf", false).await.unwrap();
    assert_ne!(after.identifier, "guide");
    assert!(after.rebuilt);
    assert!(env.index.join("guide").join(MANIFEST_FILE).exists());
}

#[tokio::test]
async fn test_backslash_keys_are_normalized() {
    let env = setup(&[("manuals/pump.txt", PUMP)]);
    let handle = env
        .manager
        .ensure_file_index("manuals\\pump.txt", false)
        .await
        .unwrap();
    assert_eq!(handle.key, "manuals/pump.txt");
}

#[tokio::test]
async fn test_concurrent_requests_build_once() {
    let env = setup(&[("pump.txt", PUMP)]);
    let (a, b) = tokio::join!(
        env.manager.ensure_file_index("pump.txt", false),
        env.manager.ensure_file_index("pump.txt", false)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(loads(&env), 1);
    assert!(a.rebuilt != b.rebuilt);
}

// ============ Category index ============

#[tokio::test]
async fn test_category_index_aggregates_documents() {
    let env = setup(&[
        ("manuals/pump.txt", PUMP),
        ("manuals/valve.md", "Valves are checked monthly."),
        ("reports/q1.txt", "Quarterly report."),
        ("loose.txt", "Not in any category."),
    ]);

    let cats = env.manager.list_categories().unwrap();
    let keys: Vec<&str> = cats.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["manuals", "reports"]);
    assert_eq!(cats[0].total, 2);

    let handle = env.manager.ensure_category_index("manuals", false).await.unwrap();
    assert!(handle.rebuilt);
    assert_eq!(handle.dir, env.index.join(CATEGORY_DIR).join("manuals"));
    assert_eq!(handle.collection, "my_rag_db_cat_manuals");
    assert_eq!(loads(&env), 2);

    let mut sources: Vec<&str> = handle
        .store
        .chunks()
        .iter()
        .map(|c| c.source.as_str())
        .collect();
    sources.dedup();
    assert_eq!(sources, vec!["manuals/pump.txt", "manuals/valve.md"]);
    for (i, c) in handle.store.chunks().iter().enumerate() {
        assert_eq!(c.chunk_index, i as i64);
    }

    let reused = env.manager.ensure_category_index("/manuals/", false).await.unwrap();
    assert!(!reused.rebuilt);
    assert_eq!(loads(&env), 2);
}

#[tokio::test]
async fn test_category_rebuilds_when_member_added() {
    let env = setup(&[("manuals/pump.txt", PUMP)]);
    env.manager.ensure_category_index("manuals", false).await.unwrap();

    write_doc(&env.docs, "manuals/valve.md", "Valves are checked monthly.");
    let handle = env.manager.ensure_category_index("manuals", false).await.unwrap();
    assert!(handle.rebuilt);
    assert!(handle
        .store
        .chunks()
        .iter()
        .any(|c| c.source == "manuals/valve.md"));
}

#[tokio::test]
async fn test_unknown_category_not_found() {
    let env = setup(&[("manuals/pump.txt", PUMP)]);
    let err = env.manager.ensure_category_index("recipes", false).await.unwrap_err();
    assert!(matches!(err, RagError::NotFound(_)));
    let err = env.manager.ensure_category_index("", false).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
}

// ============ Pre-index ============

#[tokio::test]
async fn test_preindex_batches_two_files() {
    let env = setup(&[("a.txt", "Alpha text."), ("b.pdf", "Bravo text.")]);
    let batch = |index| BatchRequest {
        batch_size: Some(1),
        batch_index: Some(index),
        ..BatchRequest::default()
    };

    let first = run_preindex(&env.manager, false, false, &batch(1)).await.unwrap();
    assert_eq!(first.selected, vec!["a.txt"]);
    assert_eq!(first.succeeded, vec!["a.txt"]);

    let second = run_preindex(&env.manager, false, false, &batch(2)).await.unwrap();
    assert_eq!(second.succeeded, vec!["b.pdf"]);

    let err = run_preindex(&env.manager, false, false, &batch(3)).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(loads(&env), 2);
}

#[tokio::test]
async fn test_preindex_pdf_only_filters_before_planning() {
    let env = setup(&[("a.txt", "Alpha."), ("b.pdf", "Bravo."), ("c.pdf", "Charlie.")]);
    let req = BatchRequest {
        offset: Some(1),
        ..BatchRequest::default()
    };
    let report = run_preindex(&env.manager, true, false, &req).await.unwrap();
    assert_eq!(report.selected, vec!["c.pdf"]);
}

#[tokio::test]
async fn test_preindex_collects_failures_and_continues() {
    let env = setup(&[("a.txt", "Alpha."), ("blank.txt", "   "), ("c.txt", "Charlie.")]);
    let report = run_preindex(&env.manager, false, false, &BatchRequest::default())
        .await
        .unwrap();
    assert_eq!(report.succeeded, vec!["a.txt", "c.txt"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "blank.txt");
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_preindex_offset_past_end_and_empty_corpus() {
    let env = setup(&[("a.txt", "Alpha.")]);
    let req = BatchRequest {
        offset: Some(5),
        ..BatchRequest::default()
    };
    let report = run_preindex(&env.manager, false, false, &req).await.unwrap();
    assert!(report.selected.is_empty());
    assert!(report.is_success());

    let none = run_preindex(&env.manager, true, false, &BatchRequest::default())
        .await
        .unwrap();
    assert!(none.selected.is_empty());
    assert_eq!(loads(&env), 0);
}

// ============ Query ============

#[tokio::test]
async fn test_query_returns_sources_and_snippets() {
    let env = setup(&[("manuals/pump.txt", PUMP), ("manuals/valve.md", "Valves are checked monthly.")]);
    let handle = env.manager.ensure_category_index("manuals", false).await.unwrap();
    let model = ThresholdModel::new(0);

    let options = QueryOptions {
        top_k: 3,
        include_snippets: true,
        ..QueryOptions::default()
    };
    let result = query::answer(
        handle.store.as_ref(),
        env.embedder.as_ref(),
        &model,
        "How often is the pump serviced?",
        &options,
    )
    .await
    .unwrap();

    assert!(result.answer.starts_with("answer from"));
    assert!(!result.sources.is_empty());
    let mut unique = result.sources.clone();
    unique.dedup();
    assert_eq!(unique, result.sources);

    let snippets = result.snippets.unwrap();
    let snippet_sources: Vec<&str> = snippets.iter().map(|s| s.source.as_str()).collect();
    for s in &snippet_sources {
        assert!(result.sources.iter().any(|src| src == s));
    }
    assert!(snippets.iter().all(|s| !s.snippet.contains('\n')));
}

#[tokio::test]
async fn test_query_validates_inputs() {
    let env = setup(&[("pump.txt", PUMP)]);
    let handle = env.manager.ensure_file_index("pump.txt", false).await.unwrap();
    let model = ThresholdModel::new(0);

    let err = query::answer(handle.store.as_ref(), env.embedder.as_ref(), &model, "  ", &QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));

    let options = QueryOptions {
        top_k: 11,
        ..QueryOptions::default()
    };
    let err = query::answer(handle.store.as_ref(), env.embedder.as_ref(), &model, "q", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

fn many_paragraphs() -> String {
    (0..12)
        .map(|i| format!("Paragraph {} about maintenance intervals and seals. {}", i, "x".repeat(450)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[tokio::test]
async fn test_empty_answer_widens_retrieval() {
    let env = setup(&[("long.txt", &many_paragraphs())]);
    let handle = env.manager.ensure_file_index("long.txt", false).await.unwrap();
    assert!(handle.store.len() >= 8);

    let model = ThresholdModel::new(5);
    let options = QueryOptions {
        top_k: 2,
        include_snippets: false,
        widen_on_empty: true,
        fallback_k: 8,
    };
    let result = query::answer(handle.store.as_ref(), env.embedder.as_ref(), &model, "seals?", &options)
        .await
        .unwrap();
    assert!(result.widened);
    assert_eq!(result.answer, "answer from 8 chunks");
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unusable_wider_answer_keeps_first() {
    let env = setup(&[("long.txt", &many_paragraphs())]);
    let handle = env.manager.ensure_file_index("long.txt", false).await.unwrap();

    let model = ThresholdModel::new(100);
    let options = QueryOptions {
        top_k: 2,
        include_snippets: false,
        widen_on_empty: true,
        fallback_k: 8,
    };
    let result = query::answer(handle.store.as_ref(), env.embedder.as_ref(), &model, "seals?", &options)
        .await
        .unwrap();
    assert!(!result.widened);
    assert!(result.answer.is_empty());
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_no_widening_unless_enabled() {
    let env = setup(&[("long.txt", &many_paragraphs())]);
    let handle = env.manager.ensure_file_index("long.txt", false).await.unwrap();

    let model = ThresholdModel::new(100);
    let options = QueryOptions {
        top_k: 2,
        ..QueryOptions::default()
    };
    query::answer(handle.store.as_ref(), env.embedder.as_ref(), &model, "seals?", &options)
        .await
        .unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

// ============ Chat loop ============

#[tokio::test]
async fn test_chat_commands() {
    let env = setup(&[("a.txt", "Alpha text."), ("b.txt", "Bravo text.")]);
    let model = ThresholdModel::new(0);
    let input = Cursor::new("/current\n/list\nWhat is alpha?\n/switch 2\n/current\n/switch nope\n/reload\nexit\n/current\n");
    let mut out = Vec::new();

    chat::run_chat(&env.manager, &model, QueryOptions::default(), "a.txt", input, &mut out)
        .await
        .unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(out.contains("Current document: a.txt"));
    assert!(out.contains("  1. a.txt\n  2. b.txt"));
    assert!(out.contains("answer from 1 chunks"));
    assert!(out.contains("Sources: a.txt"));
    assert!(out.contains("Current document: b.txt"));
    assert!(out.contains("Give a valid document name or number"));
    assert!(out.contains("Rebuilding index for b.txt"));
    assert_eq!(out.matches("Current document:").count(), 2, "nothing runs after exit");
    // a.txt, b.txt, then b.txt again on /reload
    assert_eq!(loads(&env), 3);
}
