//! Knowledge base registry: one directory per KB under a root.
//!
//! A directory is a committed knowledge base only when its name is a valid KB
//! name and its `metadata.json` parses. Staging directories of in-progress
//! creations and anything without metadata are invisible to every read path
//! here.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sitekb_servergen::{ServerGenerator, UnregistrationOutcome};
use sitekb_shared::{
    KbMetadata, KnowledgeBase, METADATA_FILE, Result, SiteKbError, validate_kb_name,
    write_atomic,
};
use sitekb_storage::{LibsqlVectorStore, VectorStore};
use tracing::{debug, info, warn};

/// A listed knowledge base.
#[derive(Debug, Clone)]
pub struct KbSummary {
    pub kb: KnowledgeBase,
    /// A generated query server exists for this KB.
    pub has_server: bool,
}

/// Metadata plus live numbers from the vector store.
#[derive(Debug, Clone)]
pub struct KbStats {
    pub kb: KnowledgeBase,
    pub stored_documents: usize,
    pub has_server: bool,
}

/// What [`Registry::delete`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// A KB directory was removed; `false` means there was nothing to delete.
    pub removed: bool,
    pub unregistration: UnregistrationOutcome,
}

#[derive(Debug, Clone)]
pub struct Registry {
    kb_root: PathBuf,
    servers: ServerGenerator,
    unregister_command: Vec<String>,
    host_timeout: Duration,
}

impl Registry {
    pub fn new(kb_root: impl Into<PathBuf>, servers: ServerGenerator) -> Self {
        Self {
            kb_root: kb_root.into(),
            servers,
            unregister_command: Vec::new(),
            host_timeout: Duration::from_secs(30),
        }
    }

    /// Run `command` (an argument template) to unregister a KB's server on delete.
    pub fn with_unregister_command(mut self, command: Vec<String>, timeout: Duration) -> Self {
        self.unregister_command = command;
        self.host_timeout = timeout;
        self
    }

    pub fn kb_root(&self) -> &Path {
        &self.kb_root
    }

    pub fn servers(&self) -> &ServerGenerator {
        &self.servers
    }

    /// Directory for `name`. Does not check that it exists.
    pub fn kb_path(&self, name: &str) -> PathBuf {
        self.kb_root.join(name)
    }

    /// Whether `name` is a committed knowledge base.
    pub fn exists(&self, name: &str) -> bool {
        self.kb_path(name).join(METADATA_FILE).is_file()
    }

    /// Every committed knowledge base, newest first.
    ///
    /// Entries with missing or unreadable metadata are skipped.
    pub fn list(&self) -> Result<Vec<KbSummary>> {
        let entries = match std::fs::read_dir(&self.kb_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SiteKbError::io(&self.kb_root, e)),
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if validate_kb_name(&name).is_err() {
                continue;
            }
            match read_metadata(&path) {
                Ok(metadata) => found.push(KbSummary {
                    has_server: self.servers.has_server(&name),
                    kb: KnowledgeBase {
                        name,
                        path,
                        metadata,
                    },
                }),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping directory"),
            }
        }

        found.sort_by_key(|s| Reverse(s.kb.metadata.created_at));
        Ok(found)
    }

    /// Load one knowledge base.
    pub fn get(&self, name: &str) -> Result<KnowledgeBase> {
        validate_kb_name(name)?;
        let path = self.kb_path(name);
        if !path.join(METADATA_FILE).is_file() {
            return Err(SiteKbError::NotFound { name: name.into() });
        }
        let metadata = read_metadata(&path)?;
        Ok(KnowledgeBase {
            name: name.to_string(),
            path,
            metadata,
        })
    }

    /// Remove a knowledge base, unregister its server and delete the server.
    ///
    /// A missing KB is success with `removed == false`. Unregistration runs
    /// only when a generated server exists and never fails the delete.
    pub async fn delete(&self, name: &str) -> Result<DeleteReport> {
        validate_kb_name(name)?;
        let path = self.kb_path(name);

        let removed = match std::fs::remove_dir_all(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(SiteKbError::io(&path, e)),
        };

        let unregistration = match self.servers.load(name) {
            Some(server) => {
                self.servers
                    .unregister(&server, &self.unregister_command, self.host_timeout)
                    .await
            }
            None => UnregistrationOutcome::Skipped,
        };
        if let Err(e) = self.servers.remove(name) {
            warn!(kb = name, error = %e, "could not remove query server");
        }

        if removed {
            info!(kb = name, "knowledge base deleted");
        } else {
            debug!(kb = name, "nothing to delete");
        }
        Ok(DeleteReport {
            removed,
            unregistration,
        })
    }

    /// Metadata plus the live document count of the vector store.
    pub async fn stats(&self, name: &str) -> Result<KbStats> {
        let kb = self.get(name)?;
        let store = LibsqlVectorStore::open(&kb.vector_store_path()).await?;
        let stored_documents = store.count().await?;
        Ok(KbStats {
            has_server: self.servers.has_server(name),
            kb,
            stored_documents,
        })
    }
}

/// Parse `<kb_path>/metadata.json`.
pub fn read_metadata(kb_path: &Path) -> Result<KbMetadata> {
    let path = kb_path.join(METADATA_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|e| SiteKbError::io(&path, e))?;
    serde_json::from_str(&raw)
        .map_err(|e| SiteKbError::parse(format!("{}: {e}", path.display())))
}

/// Write `<kb_path>/metadata.json` atomically.
pub fn write_metadata(kb_path: &Path, metadata: &KbMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SiteKbError::parse(format!("cannot serialize metadata: {e}")))?;
    write_atomic(&kb_path.join(METADATA_FILE), json.as_bytes())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sitekb_shared::METADATA_VERSION;
    use uuid::Uuid;

    use super::*;

    fn temp_registry() -> (PathBuf, Registry) {
        let root = std::env::temp_dir().join(format!("sitekb_registry_{}", Uuid::now_v7()));
        let registry = Registry::new(root.join("kbs"), ServerGenerator::new(root.join("servers")));
        (root, registry)
    }

    fn metadata(age_minutes: i64) -> KbMetadata {
        KbMetadata {
            created_at: Utc::now() - chrono::Duration::minutes(age_minutes),
            embedding_model: "feature-hash-16".into(),
            use_external_embedding: false,
            version: METADATA_VERSION.into(),
            documents: 2,
            source_url: "https://example.com".into(),
            max_pages: Some(10),
            strategy: None,
        }
    }

    fn commit(registry: &Registry, name: &str, meta: &KbMetadata) {
        let path = registry.kb_path(name);
        std::fs::create_dir_all(&path).unwrap();
        write_metadata(&path, meta).unwrap();
    }

    #[test]
    fn list_sorts_newest_first_and_skips_broken_entries() {
        let (root, registry) = temp_registry();
        commit(&registry, "old", &metadata(60));
        commit(&registry, "new", &metadata(1));

        std::fs::create_dir_all(registry.kb_path("half-built")).unwrap();
        let corrupt = registry.kb_path("corrupt");
        std::fs::create_dir_all(&corrupt).unwrap();
        std::fs::write(corrupt.join(METADATA_FILE), "{ not json").unwrap();
        std::fs::write(registry.kb_root().join("stray.txt"), "x").unwrap();
        let staging = registry.kb_root().join(".staging-0001");
        std::fs::create_dir_all(&staging).unwrap();
        write_metadata(&staging, &metadata(0)).unwrap();

        registry.servers().generate("new", &registry.kb_path("new")).unwrap();

        let listed = registry.list().unwrap();
        let names: Vec<&str> = listed.iter().map(|s| s.kb.name.as_str()).collect();
        assert_eq!(names, vec!["new", "old"]);
        assert!(listed[0].has_server);
        assert!(!listed[1].has_server);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let (_root, registry) = temp_registry();
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn get_requires_committed_metadata() {
        let (root, registry) = temp_registry();
        commit(&registry, "docs", &metadata(0));
        std::fs::create_dir_all(registry.kb_path("pending")).unwrap();

        let kb = registry.get("docs").unwrap();
        assert_eq!(kb.metadata.documents, 2);
        assert!(matches!(registry.get("pending"), Err(SiteKbError::NotFound { .. })));
        assert!(matches!(registry.get("absent"), Err(SiteKbError::NotFound { .. })));
        assert!(matches!(registry.get("../etc"), Err(SiteKbError::InvalidName { .. })));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_server() {
        let (root, registry) = temp_registry();
        commit(&registry, "docs", &metadata(0));
        registry.servers().generate("docs", &registry.kb_path("docs")).unwrap();

        let report = registry.delete("docs").await.unwrap();
        assert!(report.removed);
        assert_eq!(report.unregistration, UnregistrationOutcome::Skipped);
        assert!(!registry.exists("docs"));
        assert!(!registry.servers().has_server("docs"));

        assert!(!registry.delete("docs").await.unwrap().removed);
        assert!(!registry.delete("never-created").await.unwrap().removed);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delete_unregisters_generated_server() {
        let (root, registry) = temp_registry();
        let marker = root.join("unregistered");
        let registry = registry.with_unregister_command(
            vec![
                "sh".into(),
                "-c".into(),
                "printf %s \"$1\" > \"$2\"".into(),
                "sh".into(),
                "{name}".into(),
                marker.to_string_lossy().into_owned(),
            ],
            Duration::from_secs(5),
        );
        commit(&registry, "docs", &metadata(0));
        registry.servers().generate("docs", &registry.kb_path("docs")).unwrap();

        let report = registry.delete("docs").await.unwrap();
        assert_eq!(report.unregistration, UnregistrationOutcome::Unregistered);
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "kb-docs");
        assert!(!registry.servers().has_server("docs"));

        std::fs::remove_file(&marker).unwrap();
        let report = registry.delete("docs").await.unwrap();
        assert_eq!(report.unregistration, UnregistrationOutcome::Skipped);
        assert!(!marker.exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_unregistration_still_deletes() {
        let (root, registry) = temp_registry();
        let registry =
            registry.with_unregister_command(vec!["false".into()], Duration::from_secs(5));
        commit(&registry, "docs", &metadata(0));
        registry.servers().generate("docs", &registry.kb_path("docs")).unwrap();

        let report = registry.delete("docs").await.unwrap();
        assert!(report.removed);
        assert!(matches!(report.unregistration, UnregistrationOutcome::Failed(_)));
        assert!(!registry.servers().has_server("docs"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn delete_rejects_invalid_names() {
        let (_root, registry) = temp_registry();
        assert!(matches!(
            registry.delete("a/b").await,
            Err(SiteKbError::InvalidName { .. })
        ));
    }

    #[tokio::test]
    async fn stats_reads_live_count() {
        let (root, registry) = temp_registry();
        commit(&registry, "docs", &metadata(0));

        let stats = registry.stats("docs").await.unwrap();
        assert_eq!(stats.kb.metadata.documents, 2);
        assert_eq!(stats.stored_documents, 0);
        assert!(!stats.has_server);

        let _ = std::fs::remove_dir_all(&root);
    }
}
