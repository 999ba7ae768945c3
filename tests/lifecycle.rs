use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use hellorag_pack::embedding::{DisabledProvider, EmbeddingProvider};
use hellorag_pack::llm::LlmProvider;
use hellorag_pack::{HelloRagPack, NodeKind, PackError, PackOptions, StorageContext};

/// Deterministic bag-of-words embedder: each word bumps one hashed bucket.
struct HashEmbedder {
    name: String,
}

impl HashEmbedder {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

const DIMS: usize = 32;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                v[0] = 1.0;
                for word in text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    let bucket = word.bytes().map(|b| b as usize).sum::<usize>() % (DIMS - 1);
                    v[bucket + 1] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Returns the prompt it was given.
struct EchoLlm;

#[async_trait]
impl LlmProvider for EchoLlm {
    fn model_name(&self) -> &str {
        "echo"
    }
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(prompt.to_string())
    }
}

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        for (name, bytes) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

const MANIFEST: &str = r#"[
    {"title": "Revenue chart", "description": "Quarterly revenue bars by region", "path": "./images/chart.png", "page": 1},
    {"title": "", "description": "Untitled photo", "path": "./images/photo.png", "page": 2}
]"#;

fn report_zip() -> Vec<u8> {
    build_zip(&[
        ("image.json", MANIFEST.as_bytes()),
        ("images/chart.png", b"\x89PNG-chart".as_slice()),
        ("images/photo.png", b"\x89PNG-photo".as_slice()),
        ("1/page.txt", b"Revenue grew twelve percent in the first quarter.".as_slice()),
        ("2/page.txt", b"Headcount stayed flat across all offices.".as_slice()),
        (
            "2/tables/t0.html",
            b"<h1>Offices</h1><p>Staff per office</p><table><tr><td>Berlin</td><td>40</td></tr></table>"
                .as_slice(),
        ),
    ])
}

fn memo_zip() -> Vec<u8> {
    build_zip(&[("1/page.txt", b"The travel policy memo covers hotel limits.".as_slice())])
}

fn setup_exports() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let exports = tmp.path().join("exports");
    fs::create_dir_all(exports.join("memos")).unwrap();
    fs::write(exports.join("q1.zip"), report_zip()).unwrap();
    fs::write(exports.join("memos").join("travel.zip"), memo_zip()).unwrap();
    tmp
}

fn options(root: &Path, need_refresh: bool) -> PackOptions {
    PackOptions {
        base_path: Some(root.join("exports")),
        index_path: Some(root.join("index")),
        need_refresh,
        top_k: 10,
        ..PackOptions::default()
    }
}

async fn built_pack(root: &Path) -> HelloRagPack {
    HelloRagPack::open(options(root, true), HashEmbedder::new("hash-v1"), Arc::new(EchoLlm))
        .await
        .unwrap()
}

#[test]
fn backend_must_be_exactly_one() {
    let tmp = TempDir::new().unwrap();

    let both = PackOptions {
        storage_context: Some(StorageContext::qdrant("http://127.0.0.1:1", "pack")),
        ..options(tmp.path(), false)
    };
    let neither = PackOptions {
        index_path: None,
        ..options(tmp.path(), false)
    };
    for opts in [both, neither] {
        let result = HelloRagPack::new(opts, Arc::new(DisabledProvider), Arc::new(EchoLlm));
        assert!(matches!(result, Err(PackError::Configuration(_))));
    }
    assert!(!tmp.path().join("index").exists());
}

#[tokio::test]
async fn refresh_indexes_every_archive() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;

    let report = pack.last_refresh().unwrap().clone();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.ingested.len(), 2);
    assert!(report.skipped.is_empty());
    assert_eq!(report.table_nodes, 1);
    // The second manifest entry has an empty title.
    assert_eq!(report.image_nodes, 1);
    assert_eq!(report.embedded_nodes, report.total_nodes());

    let stats = pack.index().unwrap().backend().stats().await.unwrap();
    assert_eq!(stats.archives, 2);
    assert_eq!(stats.total_nodes() as usize, report.total_nodes());
    pack.close().await;
}

#[tokio::test]
async fn refresh_is_idempotent() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;

    let backend = pack.index().unwrap().backend();
    let ids_before = backend.node_ids("q1.zip").await.unwrap();
    let stats_before = backend.stats().await.unwrap();
    assert!(!ids_before.is_empty());

    let report = pack.refresh().await.unwrap();
    assert_eq!(report.ingested.len(), 2);
    assert!(report.pruned.is_empty());

    let backend = pack.index().unwrap().backend();
    assert_eq!(backend.node_ids("q1.zip").await.unwrap(), ids_before);
    assert_eq!(backend.stats().await.unwrap(), stats_before);
    pack.close().await;
}

#[tokio::test]
async fn images_can_be_excluded() {
    let tmp = setup_exports();
    let opts = PackOptions {
        no_use_image_in_rag: true,
        ..options(tmp.path(), true)
    };
    let mut pack = HelloRagPack::open(opts, HashEmbedder::new("hash-v1"), Arc::new(EchoLlm))
        .await
        .unwrap();

    assert_eq!(pack.last_refresh().unwrap().image_nodes, 0);
    let stats = pack.index().unwrap().backend().stats().await.unwrap();
    assert_eq!(stats.image_nodes, 0);
    assert!(stats.text_nodes > 0);
    pack.close().await;
}

#[tokio::test]
async fn load_does_not_ingest_or_write() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;
    pack.close().await;

    let index_file = tmp.path().join("index").join("index.sqlite");
    let before = fs::read(&index_file).unwrap();

    // A new export appears, but a load must not pick it up.
    fs::write(tmp.path().join("exports").join("late.zip"), memo_zip()).unwrap();

    let mut loaded = HelloRagPack::open(
        options(tmp.path(), false),
        HashEmbedder::new("hash-v1"),
        Arc::new(EchoLlm),
    )
    .await
    .unwrap();
    assert!(loaded.last_refresh().is_none());

    let hits = loaded.retrieve("travel policy").await.unwrap();
    assert!(!hits.is_empty());
    let archives = loaded.index().unwrap().backend().archives().await.unwrap();
    assert_eq!(archives.len(), 2);
    loaded.close().await;

    assert_eq!(fs::read(&index_file).unwrap(), before);
}

#[tokio::test]
async fn corrupt_archive_is_skipped_and_reported() {
    let tmp = setup_exports();
    fs::write(tmp.path().join("exports").join("broken.zip"), b"not a zip at all").unwrap();

    let mut pack = built_pack(tmp.path()).await;
    let report = pack.last_refresh().unwrap();
    assert_eq!(report.discovered, 3);
    assert_eq!(report.ingested.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "broken.zip");

    let archives = pack.index().unwrap().backend().archives().await.unwrap();
    assert!(archives.iter().all(|a| a.id != "broken.zip"));
    pack.close().await;
}

#[tokio::test]
async fn run_answers_with_text_and_image_sources() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;

    let result = pack.run("What did the revenue chart show?").await.unwrap();
    assert!(result.answer.contains("Revenue grew twelve percent"));
    assert!(result.answer.contains("What did the revenue chart show?"));

    let images: Vec<_> = result.image_nodes().collect();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].node.kind, NodeKind::Image);
    assert!(images[0].node.text.contains("Revenue chart"));
    assert!(images[0].node.image.is_some());
    pack.close().await;
}

#[tokio::test]
async fn keyword_retrieval_without_embeddings() {
    let tmp = setup_exports();
    let mut pack = HelloRagPack::open(
        options(tmp.path(), true),
        Arc::new(DisabledProvider),
        Arc::new(EchoLlm),
    )
    .await
    .unwrap();

    assert_eq!(pack.last_refresh().unwrap().embedded_nodes, 0);
    let hits = pack.retrieve("hotel").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].node.archive_id, "memos/travel.zip");
    pack.close().await;
}

#[tokio::test]
async fn run_before_initialize_is_a_query_error() {
    let tmp = setup_exports();
    let pack = HelloRagPack::new(
        options(tmp.path(), true),
        HashEmbedder::new("hash-v1"),
        Arc::new(EchoLlm),
    )
    .unwrap();
    assert!(matches!(pack.run("revenue").await, Err(PackError::Query(_))));
}

#[tokio::test]
async fn loading_a_missing_index_is_not_found() {
    let tmp = setup_exports();
    let result = HelloRagPack::open(
        options(tmp.path(), false),
        HashEmbedder::new("hash-v1"),
        Arc::new(EchoLlm),
    )
    .await;
    assert!(matches!(result, Err(PackError::NotFound(_))));
}

#[tokio::test]
async fn loading_with_another_embedding_model_is_rejected() {
    let tmp = setup_exports();
    built_pack(tmp.path()).await.close().await;

    let result = HelloRagPack::open(
        options(tmp.path(), false),
        HashEmbedder::new("hash-v2"),
        Arc::new(EchoLlm),
    )
    .await;
    assert!(matches!(result, Err(PackError::Configuration(_))));
}

#[tokio::test]
async fn removed_archives_are_pruned() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;

    fs::remove_file(tmp.path().join("exports").join("memos").join("travel.zip")).unwrap();
    let report = pack.refresh().await.unwrap();
    assert_eq!(report.pruned, vec!["memos/travel.zip".to_string()]);

    let backend = pack.index().unwrap().backend();
    assert_eq!(backend.stats().await.unwrap().archives, 1);
    assert!(backend.node_ids("memos/travel.zip").await.unwrap().is_empty());
    pack.close().await;
}

#[tokio::test]
async fn loading_keyword_only_index_with_embedder_is_rejected() {
    let tmp = setup_exports();
    HelloRagPack::open(options(tmp.path(), true), Arc::new(DisabledProvider), Arc::new(EchoLlm))
        .await
        .unwrap()
        .close()
        .await;

    let result = HelloRagPack::open(
        options(tmp.path(), false),
        HashEmbedder::new("hash-v1"),
        Arc::new(EchoLlm),
    )
    .await;
    assert!(matches!(result, Err(PackError::Configuration(_))));
}

#[tokio::test]
async fn keyword_only_refresh_clears_recorded_model() {
    let tmp = setup_exports();
    built_pack(tmp.path()).await.close().await;

    let mut pack = HelloRagPack::open(
        options(tmp.path(), true),
        Arc::new(DisabledProvider),
        Arc::new(EchoLlm),
    )
    .await
    .unwrap();
    let backend = pack.index().unwrap().backend();
    assert_eq!(backend.embedding_model().await.unwrap(), None);
    pack.close().await;

    let result = HelloRagPack::open(
        options(tmp.path(), false),
        HashEmbedder::new("hash-v1"),
        Arc::new(EchoLlm),
    )
    .await;
    assert!(matches!(result, Err(PackError::Configuration(_))));
}

#[tokio::test]
async fn model_change_drops_archives_that_failed_to_reingest() {
    let tmp = setup_exports();
    built_pack(tmp.path()).await.close().await;
    fs::write(tmp.path().join("exports").join("q1.zip"), b"truncated upload").unwrap();

    let mut pack = HelloRagPack::open(
        options(tmp.path(), true),
        HashEmbedder::new("hash-v2"),
        Arc::new(EchoLlm),
    )
    .await
    .unwrap();
    let report = pack.last_refresh().unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "q1.zip");
    assert_eq!(report.stale, vec!["q1.zip".to_string()]);

    let backend = pack.index().unwrap().backend();
    assert!(backend.node_ids("q1.zip").await.unwrap().is_empty());
    assert!(!backend.node_ids("memos/travel.zip").await.unwrap().is_empty());
    assert_eq!(
        backend.embedding_model().await.unwrap().as_deref(),
        Some("hash-v2")
    );
    pack.close().await;

    HelloRagPack::open(
        options(tmp.path(), false),
        HashEmbedder::new("hash-v2"),
        Arc::new(EchoLlm),
    )
    .await
    .unwrap()
    .close()
    .await;
}

#[tokio::test]
async fn same_model_keeps_archives_that_failed_to_reingest() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;
    let ids_before = pack.index().unwrap().backend().node_ids("q1.zip").await.unwrap();
    fs::write(tmp.path().join("exports").join("q1.zip"), b"truncated upload").unwrap();

    let report = pack.refresh().await.unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert!(report.stale.is_empty());

    let backend = pack.index().unwrap().backend();
    assert_eq!(backend.node_ids("q1.zip").await.unwrap(), ids_before);
    assert_eq!(
        backend.embedding_model().await.unwrap().as_deref(),
        Some("hash-v1")
    );
    pack.close().await;
}

#[tokio::test]
async fn failed_refresh_keeps_previous_index_attached() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;
    fs::remove_dir_all(tmp.path().join("exports")).unwrap();

    assert!(matches!(pack.refresh().await, Err(PackError::Configuration(_))));
    assert!(pack.index().is_some());
    assert_eq!(pack.last_refresh().unwrap().ingested.len(), 2);

    let hits = pack.retrieve("travel policy").await.unwrap();
    assert!(!hits.is_empty());
    pack.close().await;
}

#[tokio::test]
async fn chat_keeps_earlier_turns_in_view() {
    let tmp = setup_exports();
    let mut pack = built_pack(tmp.path()).await;

    {
        let mut session = pack.chat().unwrap();
        let first = session.send("What does the travel policy cover?").await.unwrap();
        assert!(first.answer.contains("hotel limits"));

        let second = session.send("And revenue?").await.unwrap();
        assert!(second.answer.contains("user: What does the travel policy cover?"));
        assert!(second.answer.contains("Revenue grew twelve percent"));
        assert_eq!(session.history().len(), 4);
    }
    pack.close().await;
}
