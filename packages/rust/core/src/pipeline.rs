//! End-to-end pipelines: seed URL → crawl, and crawl → committed knowledge base.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sitekb_crawler::{
    CrawlOutcome, CrawlProgress, ExtractOptions, ExtractorFactory, FetchOptions,
    HttpExtractorFactory, crawl_recursive, fetch_batch,
};
use sitekb_discovery::{Detection, DiscoveryOptions, detect, resolve};
use sitekb_embedding::{DefaultEmbedderProvider, Embedder, EmbedderProvider};
use sitekb_servergen::{RegistrationOutcome, ServerGenerator};
use sitekb_shared::{
    AppConfig, CrawlConfig, CrawlRequest, EmbeddingIdentity, KbMetadata, KnowledgeBase, METADATA_VERSION,
    Result, SiteKbError, Strategy, validate_kb_name, vector_store_path,
};
use sitekb_storage::{LibsqlVectorStore, VectorStore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::assembler::{build_documents, into_records};
use crate::registry::{Registry, write_metadata};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a page is accepted during the crawl.
    fn page_fetched(&self, url: &str, current: usize, budget: usize);
    /// Called when a URL yields no page.
    fn page_failed(&self, _url: &str) {}
    /// Called when creation completes.
    fn done(&self, report: &CreateReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_fetched(&self, _url: &str, _current: usize, _budget: usize) {}
    fn done(&self, _report: &CreateReport) {}
}

/// Forwards crawler progress to a [`ProgressReporter`].
struct CrawlBridge<'a>(&'a dyn ProgressReporter);

impl CrawlProgress for CrawlBridge<'_> {
    fn page_fetched(&self, url: &str, accepted: usize, budget: usize) {
        self.0.page_fetched(url, accepted, budget);
    }

    fn page_failed(&self, url: &str) {
        self.0.page_failed(url);
    }
}

// ---------------------------------------------------------------------------
// Crawl
// ---------------------------------------------------------------------------

/// Detect the crawl strategy for `request.seed` and run it.
///
/// Sitemap mode resolves at most `max_pages` URLs and fetches them in
/// batches. A sitemap that resolves to no pages falls back to the recursive
/// crawl.
#[instrument(skip_all, fields(seed = %request.seed, max_pages = request.max_pages))]
pub async fn crawl_site(
    request: &CrawlRequest,
    config: &CrawlConfig,
    extractors: &dyn ExtractorFactory,
    progress: &dyn ProgressReporter,
) -> Result<CrawlOutcome> {
    let discovery = DiscoveryOptions::from(config);
    let fetch = FetchOptions::from(config);
    let bridge = CrawlBridge(progress);

    progress.phase("Detecting crawl strategy");
    let detection: Detection = detect(&request.seed, &discovery).await;

    let outcome = match detection.strategy {
        Strategy::Sitemap => {
            progress.phase("Resolving sitemap");
            let urls = resolve(&detection.target, Some(request.max_pages), &discovery).await;
            if urls.is_empty() {
                warn!(sitemap = %detection.target, "sitemap listed no pages, crawling recursively");
                progress.phase("Crawling site");
                crawl_recursive(
                    extractors,
                    &detection.seed,
                    request.max_pages,
                    request.max_depth,
                    fetch.timeout,
                    &bridge,
                )
                .await?
            } else {
                progress.phase("Fetching sitemap pages");
                let urls = &urls[..urls.len().min(request.max_pages)];
                fetch_batch(extractors, urls, &fetch, &bridge).await?
            }
        }
        Strategy::Recursive => {
            progress.phase("Crawling site");
            crawl_recursive(
                extractors,
                &detection.seed,
                request.max_pages,
                request.max_depth,
                fetch.timeout,
                &bridge,
            )
            .await?
        }
    };

    info!(
        strategy = %outcome.strategy,
        pages = outcome.pages.len(),
        failed = outcome.failures.len(),
        skipped = outcome.skipped,
        duration_ms = outcome.duration.as_millis() as u64,
        "crawl finished"
    );
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Knowledge base creation
// ---------------------------------------------------------------------------

/// Collaborators the creation pipeline runs against.
#[derive(Clone)]
pub struct Services {
    pub registry: Registry,
    pub extractors: Arc<dyn ExtractorFactory>,
    pub embedders: Arc<dyn EmbedderProvider>,
}

impl Services {
    /// HTTP extraction, configured embedders and the configured directories.
    pub fn from_config(config: &AppConfig) -> Self {
        let crawl = CrawlConfig::from(config);
        Self {
            registry: Registry::new(config.kb_root(), ServerGenerator::new(config.servers_dir()))
                .with_unregister_command(
                    config.server.unregister_command.clone(),
                    Duration::from_secs(config.server.register_timeout_secs),
                ),
            extractors: Arc::new(HttpExtractorFactory::new(ExtractOptions::from(&crawl))),
            embedders: Arc::new(DefaultEmbedderProvider::new(config.embedding.clone())),
        }
    }
}

/// Input for [`create_knowledge_base`].
#[derive(Debug, Clone)]
pub struct CreateKbConfig {
    pub name: String,
    pub source_url: String,
    /// Timeouts, batch size and page/depth budgets.
    pub crawl: CrawlConfig,
    pub identity: EmbeddingIdentity,
    /// Registration argument template; empty skips registration.
    pub register_command: Vec<String>,
    pub register_timeout: Duration,
}

/// Status of the post-commit query-server step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStep {
    Generated {
        dir: PathBuf,
        registration: RegistrationOutcome,
    },
    /// Generation failed; the knowledge base is still usable.
    Failed(String),
}

/// Result of a successful creation.
#[derive(Debug, Clone)]
pub struct CreateReport {
    pub kb: KnowledgeBase,
    pub crawl: CrawlOutcome,
    pub server: ServerStep,
    pub elapsed: Duration,
}

/// Prefix of in-progress build directories under the KB root.
pub const STAGING_PREFIX: &str = ".staging-";

/// A private build directory under the KB root, removed on drop unless it was
/// committed. Only the creation that made it ever touches it.
struct Staging {
    path: PathBuf,
    committed: bool,
}

impl Staging {
    fn create(kb_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(kb_root).map_err(|e| SiteKbError::io(kb_root, e))?;
        let path = kb_root.join(format!("{STAGING_PREFIX}{}", Uuid::now_v7()));
        std::fs::create_dir(&path).map_err(|e| SiteKbError::io(&path, e))?;
        debug!(path = %path.display(), "staging directory created");
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Move the finished build to `target`. An existing target is a
    /// [`SiteKbError::NameConflict`] and leaves it untouched.
    fn commit(mut self, name: &str, target: &Path) -> Result<()> {
        if target.exists() {
            return Err(SiteKbError::NameConflict { name: name.into() });
        }
        match std::fs::rename(&self.path, target) {
            Ok(()) => {
                self.committed = true;
                Ok(())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                Err(SiteKbError::NameConflict { name: name.into() })
            }
            Err(e) => Err(SiteKbError::io(target, e)),
        }
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed uncommitted staging directory"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not clean up staging directory"),
        }
    }
}

/// Fail with [`SiteKbError::NameConflict`] if anything occupies `name`.
fn ensure_name_free(registry: &Registry, name: &str) -> Result<()> {
    let path = registry.kb_path(name);
    if registry.exists(name) {
        return Err(SiteKbError::NameConflict { name: name.into() });
    }
    if path.exists() {
        warn!(
            path = %path.display(),
            "directory without metadata occupies this name; remove it with `sitekb delete {name}`"
        );
        return Err(SiteKbError::NameConflict { name: name.into() });
    }
    Ok(())
}

/// Crawl a site and commit it as a new knowledge base.
///
/// 1. Reject invalid or taken names before any network work
/// 2. Crawl; zero pages is [`SiteKbError::EmptyCrawl`]
/// 3. Build the vector store and `metadata.json` in a private staging directory
/// 4. Rename the staging directory to `<kb_root>/<name>` (the commit point);
///    a name taken meanwhile is [`SiteKbError::NameConflict`]
/// 5. Generate and register the query server; failures only warn
///
/// Any failure before step 4 removes only this creation's staging directory,
/// so the name never appears in the registry half-built and a concurrent
/// creation of the same name is never disturbed.
#[instrument(skip_all, fields(name = %config.name, url = %config.source_url))]
pub async fn create_knowledge_base(
    config: &CreateKbConfig,
    services: &Services,
    progress: &dyn ProgressReporter,
) -> Result<CreateReport> {
    let started = Instant::now();
    let name = config.name.as_str();

    validate_kb_name(name)?;
    let registry = &services.registry;
    ensure_name_free(registry, name)?;
    let request = CrawlRequest::new(
        config.source_url.clone(),
        config.crawl.max_pages,
        config.crawl.max_depth,
    )?;
    let embedder = embedder_for(services.embedders.as_ref(), &config.identity)?;

    info!(identity = %config.identity, "creating knowledge base");

    let crawl = crawl_site(&request, &config.crawl, services.extractors.as_ref(), progress).await?;
    if crawl.pages.is_empty() {
        return Err(SiteKbError::EmptyCrawl {
            url: request.seed.clone(),
        });
    }

    progress.phase("Allocating storage");
    let staging = Staging::create(registry.kb_root())?;

    progress.phase("Indexing documents");
    let documents = build_documents(name, &crawl.pages);
    let document_count = documents.len();
    index_documents(staging.path(), embedder.as_ref(), documents).await?;

    progress.phase("Writing metadata");
    let metadata = KbMetadata {
        created_at: Utc::now(),
        embedding_model: config.identity.model.clone(),
        use_external_embedding: config.identity.external,
        version: METADATA_VERSION.to_string(),
        documents: document_count,
        source_url: config.source_url.clone(),
        max_pages: Some(request.max_pages),
        strategy: Some(crawl.strategy),
    };
    write_metadata(staging.path(), &metadata)?;
    let kb_path = registry.kb_path(name);
    staging.commit(name, &kb_path)?;

    let kb = KnowledgeBase {
        name: name.to_string(),
        path: kb_path,
        metadata,
    };
    info!(documents = document_count, path = %kb.path.display(), "knowledge base committed");

    progress.phase("Generating query server");
    let server = generate_server(config, registry, &kb).await;

    let report = CreateReport {
        kb,
        crawl,
        server,
        elapsed: started.elapsed(),
    };
    progress.done(&report);
    Ok(report)
}

/// Resolve the embedder for `identity`, insisting it reports that identity.
fn embedder_for(
    provider: &dyn EmbedderProvider,
    identity: &EmbeddingIdentity,
) -> Result<Arc<dyn Embedder>> {
    let embedder = provider.embedder_for(identity)?;
    if embedder.identity() != identity {
        return Err(SiteKbError::EmbeddingMismatch {
            expected: identity.to_string(),
            actual: embedder.identity().to_string(),
        });
    }
    Ok(embedder)
}

/// Embed and persist documents into the KB's vector store.
async fn index_documents(
    kb_path: &Path,
    embedder: &dyn Embedder,
    documents: Vec<sitekb_shared::Document>,
) -> Result<()> {
    let store = LibsqlVectorStore::open(&vector_store_path(kb_path))
        .await
        .map_err(|e| SiteKbError::Indexing(e.to_string()))?;

    let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
    let vectors = embedder
        .embed_batch(&texts)
        .await
        .map_err(|e| SiteKbError::Indexing(e.to_string()))?;
    let records = into_records(documents, vectors)?;

    store
        .upsert(&records)
        .await
        .map_err(|e| SiteKbError::Indexing(e.to_string()))?;

    let stored = store
        .count()
        .await
        .map_err(|e| SiteKbError::Indexing(e.to_string()))?;
    debug!(records = records.len(), stored, "documents indexed");
    Ok(())
}

async fn generate_server(
    config: &CreateKbConfig,
    registry: &Registry,
    kb: &KnowledgeBase,
) -> ServerStep {
    let servers = registry.servers();
    match servers.generate(&kb.name, &kb.path) {
        Ok(server) => {
            let registration = servers
                .register(&server, &config.register_command, config.register_timeout)
                .await;
            ServerStep::Generated {
                dir: server.dir,
                registration,
            }
        }
        Err(e) => {
            warn!(kb = %kb.name, error = %e, "query server generation failed");
            ServerStep::Failed(e.to_string())
        }
    }
}
