//! Query-server generation for knowledge bases.
//!
//! A generated server is a small directory under the configured servers root
//! holding a `server.json` manifest (how to launch a query process bound to
//! one knowledge base) and a README. Generation never touches the knowledge
//! base itself, so it can be rerun at any time.
//!
//! Registration with a host application is a separate, optional step driven
//! by an argument-vector template from config, and so is unregistration when a
//! knowledge base is deleted. Both are executed without a shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitekb_shared::{Result, SiteKbError, write_atomic};
use tracing::{debug, info, warn};

/// Manifest file written into every server directory.
pub const MANIFEST_FILE: &str = "server.json";

const README_FILE: &str = "README.md";

/// Program that serves queries for a generated server.
const LAUNCH_PROGRAM: &str = "sitekb";

/// Server name for a knowledge base: `<base>-kb` when the name ends with
/// `-kb-data`, otherwise `kb-<name>`.
pub fn server_name(kb_name: &str) -> String {
    match kb_name.strip_suffix("-kb-data") {
        Some(base) if !base.is_empty() => format!("{base}-kb"),
        _ => format!("kb-{kb_name}"),
    }
}

/// Contents of `server.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerManifest {
    pub name: String,
    pub kb_name: String,
    pub kb_path: PathBuf,
    /// Argument vector that starts the query server.
    pub command: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub generator_version: String,
}

/// A server directory on disk.
#[derive(Debug, Clone)]
pub struct GeneratedServer {
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: ServerManifest,
}

/// Result of the optional registration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// No registration command configured.
    Skipped,
    Registered,
    Failed(String),
}

/// Result of the optional unregistration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregistrationOutcome {
    /// No unregistration command configured, or no server to unregister.
    Skipped,
    Unregistered,
    Failed(String),
}

/// Writes, lists and removes generated query servers.
#[derive(Debug, Clone)]
pub struct ServerGenerator {
    servers_dir: PathBuf,
}

impl ServerGenerator {
    pub fn new(servers_dir: impl Into<PathBuf>) -> Self {
        Self {
            servers_dir: servers_dir.into(),
        }
    }

    pub fn servers_dir(&self) -> &Path {
        &self.servers_dir
    }

    /// Directory a knowledge base's server lives in.
    pub fn server_dir(&self, kb_name: &str) -> PathBuf {
        self.servers_dir.join(server_name(kb_name))
    }

    pub fn has_server(&self, kb_name: &str) -> bool {
        self.server_dir(kb_name).join(MANIFEST_FILE).is_file()
    }

    /// Write (or overwrite) the server directory for `kb_name`.
    pub fn generate(&self, kb_name: &str, kb_path: &Path) -> Result<GeneratedServer> {
        let dir = self.server_dir(kb_name);
        std::fs::create_dir_all(&dir).map_err(|e| SiteKbError::io(&dir, e))?;

        let manifest = ServerManifest {
            name: server_name(kb_name),
            kb_name: kb_name.to_string(),
            kb_path: kb_path.to_path_buf(),
            command: vec![
                LAUNCH_PROGRAM.to_string(),
                "serve".to_string(),
                kb_name.to_string(),
            ],
            generated_at: Utc::now(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| SiteKbError::Codegen(format!("cannot serialize manifest: {e}")))?;
        let manifest_path = dir.join(MANIFEST_FILE);
        write_atomic(&manifest_path, json.as_bytes())?;
        write_atomic(&dir.join(README_FILE), render_readme(&manifest).as_bytes())?;

        info!(server = %manifest.name, dir = %dir.display(), "query server generated");

        Ok(GeneratedServer {
            dir,
            manifest_path,
            manifest,
        })
    }

    /// Run the registration command for `server`.
    ///
    /// Each template element has `{name}`, `{manifest}` and `{kb_path}`
    /// substituted independently; the first element is the program.
    pub async fn register(
        &self,
        server: &GeneratedServer,
        template: &[String],
        timeout: Duration,
    ) -> RegistrationOutcome {
        let outcome = match run_host_command(server, template, timeout).await {
            None => RegistrationOutcome::Skipped,
            Some(Ok(())) => RegistrationOutcome::Registered,
            Some(Err(reason)) => RegistrationOutcome::Failed(reason),
        };

        match &outcome {
            RegistrationOutcome::Registered => {
                info!(server = %server.manifest.name, "query server registered");
            }
            RegistrationOutcome::Failed(reason) => {
                warn!(server = %server.manifest.name, reason, "query server registration failed");
            }
            RegistrationOutcome::Skipped => {}
        }
        outcome
    }

    /// Run the unregistration command for `server`. Same placeholders as
    /// [`ServerGenerator::register`].
    pub async fn unregister(
        &self,
        server: &GeneratedServer,
        template: &[String],
        timeout: Duration,
    ) -> UnregistrationOutcome {
        let outcome = match run_host_command(server, template, timeout).await {
            None => UnregistrationOutcome::Skipped,
            Some(Ok(())) => UnregistrationOutcome::Unregistered,
            Some(Err(reason)) => UnregistrationOutcome::Failed(reason),
        };

        match &outcome {
            UnregistrationOutcome::Unregistered => {
                info!(server = %server.manifest.name, "query server unregistered");
            }
            UnregistrationOutcome::Failed(reason) => {
                warn!(server = %server.manifest.name, reason, "query server unregistration failed");
            }
            UnregistrationOutcome::Skipped => {}
        }
        outcome
    }

    /// Load the generated server for `kb_name`, if there is a readable one.
    pub fn load(&self, kb_name: &str) -> Option<GeneratedServer> {
        read_server(self.server_dir(kb_name))
    }

    /// Delete the server directory for `kb_name`. Missing is fine.
    pub fn remove(&self, kb_name: &str) -> Result<()> {
        let dir = self.server_dir(kb_name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(dir = %dir.display(), "query server removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SiteKbError::io(&dir, e)),
        }
    }

    /// All generated servers, sorted by name. Unreadable entries are skipped.
    pub fn list(&self) -> Result<Vec<GeneratedServer>> {
        let entries = match std::fs::read_dir(&self.servers_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SiteKbError::io(&self.servers_dir, e)),
        };

        let mut servers: Vec<GeneratedServer> = entries
            .flatten()
            .filter_map(|entry| read_server(entry.path()))
            .collect();

        servers.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        Ok(servers)
    }
}

fn read_server(dir: PathBuf) -> Option<GeneratedServer> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&manifest_path).ok()?;
    match serde_json::from_str::<ServerManifest>(&raw) {
        Ok(manifest) => Some(GeneratedServer {
            dir,
            manifest_path,
            manifest,
        }),
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "skipping unreadable server manifest");
            None
        }
    }
}

/// Run a host command template for `server`.
///
/// `None` when the template is empty; otherwise whether the command exited
/// successfully within `timeout`.
async fn run_host_command(
    server: &GeneratedServer,
    template: &[String],
    timeout: Duration,
) -> Option<std::result::Result<(), String>> {
    let (program, args) = template.split_first()?;

    let program = substitute(program, server);
    let args: Vec<String> = args.iter().map(|a| substitute(a, server)).collect();
    debug!(program, ?args, "running host command");

    let mut command = tokio::process::Command::new(&program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let result = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => Err(format!("timed out after {timeout:?}")),
        Ok(Err(e)) => Err(format!("cannot run '{program}': {e}")),
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "'{program}' exited with {}: {}",
                output.status,
                stderr.trim()
            ))
        }
    };
    Some(result)
}

fn substitute(template: &str, server: &GeneratedServer) -> String {
    template
        .replace("{name}", &server.manifest.name)
        .replace("{manifest}", &server.manifest_path.to_string_lossy())
        .replace("{kb_path}", &server.manifest.kb_path.to_string_lossy())
}

fn render_readme(manifest: &ServerManifest) -> String {
    format!(
        "# {name}\n\n\
         Query server for the `{kb}` knowledge base.\n\n\
         Knowledge base: `{path}`\n\n\
         ## Running\n\n\
         ```sh\n{command}\n```\n\n\
         The server reads one JSON request per line on stdin, for example\n\
         `{{\"query\": \"how do I configure caching\", \"limit\": 5}}`, and answers\n\
         each with one JSON line of results ordered by distance.\n\n\
         Generated by sitekb {version} at {at}.\n",
        name = manifest.name,
        kb = manifest.kb_name,
        path = manifest.kb_path.display(),
        command = manifest.command.join(" "),
        version = manifest.generator_version,
        at = manifest.generated_at.to_rfc3339(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("sitekb_servers_{}", Uuid::now_v7()))
    }

    #[test]
    fn naming_rules() {
        assert_eq!(server_name("docs-kb-data"), "docs-kb");
        assert_eq!(server_name("docs"), "kb-docs");
        assert_eq!(server_name("-kb-data"), "kb--kb-data");
    }

    #[test]
    fn generate_writes_manifest_and_readme() {
        let root = temp_root();
        let generator = ServerGenerator::new(&root);
        let server = generator
            .generate("rust_docs", Path::new("/data/kbs/rust_docs"))
            .unwrap();

        assert_eq!(server.dir, root.join("kb-rust_docs"));
        assert!(generator.has_server("rust_docs"));
        assert_eq!(server.manifest.command, vec!["sitekb", "serve", "rust_docs"]);

        let raw = std::fs::read_to_string(&server.manifest_path).unwrap();
        let parsed: ServerManifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, server.manifest);

        let readme = std::fs::read_to_string(server.dir.join(README_FILE)).unwrap();
        assert!(readme.contains("sitekb serve rust_docs"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn regenerate_overwrites_and_list_finds_it_once() {
        let root = temp_root();
        let generator = ServerGenerator::new(&root);
        generator.generate("a", Path::new("/kb/a")).unwrap();
        generator.generate("a", Path::new("/kb/a2")).unwrap();
        generator.generate("b-kb-data", Path::new("/kb/b")).unwrap();

        let servers = generator.list().unwrap();
        let names: Vec<&str> = servers.iter().map(|s| s.manifest.name.as_str()).collect();
        assert_eq!(names, vec!["b-kb", "kb-a"]);
        assert_eq!(servers[1].manifest.kb_path, PathBuf::from("/kb/a2"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn remove_is_idempotent() {
        let root = temp_root();
        let generator = ServerGenerator::new(&root);
        generator.generate("gone", Path::new("/kb/gone")).unwrap();

        generator.remove("gone").unwrap();
        assert!(!generator.has_server("gone"));
        generator.remove("gone").unwrap();
        generator.remove("never-existed").unwrap();

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let generator = ServerGenerator::new(temp_root());
        assert!(generator.list().unwrap().is_empty());
    }

    #[test]
    fn placeholders_substitute_per_argument() {
        let server = GeneratedServer {
            dir: PathBuf::from("/srv/kb-x"),
            manifest_path: PathBuf::from("/srv/kb-x/server.json"),
            manifest: ServerManifest {
                name: "kb-x".into(),
                kb_name: "x".into(),
                kb_path: PathBuf::from("/kb/x; rm -rf /"),
                command: vec![],
                generated_at: Utc::now(),
                generator_version: "0".into(),
            },
        };
        assert_eq!(substitute("--name={name}", &server), "--name=kb-x");
        assert_eq!(substitute("{manifest}", &server), "/srv/kb-x/server.json");
        assert_eq!(substitute("{kb_path}", &server), "/kb/x; rm -rf /");
    }

    #[tokio::test]
    async fn empty_template_skips() {
        let root = temp_root();
        let generator = ServerGenerator::new(&root);
        let server = generator.generate("s", Path::new("/kb/s")).unwrap();
        let outcome = generator
            .register(&server, &[], Duration::from_secs(1))
            .await;
        assert_eq!(outcome, RegistrationOutcome::Skipped);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_program_fails_without_error() {
        let root = temp_root();
        let generator = ServerGenerator::new(&root);
        let server = generator.generate("s", Path::new("/kb/s")).unwrap();
        let template = vec![format!("sitekb-no-such-program-{}", Uuid::now_v7())];
        let outcome = generator
            .register(&server, &template, Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, RegistrationOutcome::Failed(_)));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn register_reports_exit_status() {
        let root = temp_root();
        let generator = ServerGenerator::new(&root);
        let server = generator.generate("s", Path::new("/kb/s")).unwrap();

        let ok = generator
            .register(&server, &["true".to_string()], Duration::from_secs(5))
            .await;
        assert_eq!(ok, RegistrationOutcome::Registered);

        let bad = generator
            .register(&server, &["false".to_string()], Duration::from_secs(5))
            .await;
        assert!(matches!(bad, RegistrationOutcome::Failed(_)));

        let slow = generator
            .register(
                &server,
                &["sleep".to_string(), "5".to_string()],
                Duration::from_millis(200),
            )
            .await;
        match slow {
            RegistrationOutcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unregister_runs_template_with_placeholders() {
        let root = temp_root();
        let generator = ServerGenerator::new(&root);
        generator.generate("docs", Path::new("/kb/docs")).unwrap();
        let server = generator.load("docs").expect("generated server loads");
        assert_eq!(server.manifest.name, "kb-docs");

        let marker = root.join("unregistered");
        let template = vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf %s \"$1\" > \"$2\"".to_string(),
            "sh".to_string(),
            "{name}".to_string(),
            marker.to_string_lossy().into_owned(),
        ];
        let outcome = generator
            .unregister(&server, &template, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, UnregistrationOutcome::Unregistered);
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "kb-docs");

        let failed = generator
            .unregister(&server, &["false".to_string()], Duration::from_secs(5))
            .await;
        assert!(matches!(failed, UnregistrationOutcome::Failed(_)));
        assert_eq!(
            generator.unregister(&server, &[], Duration::from_secs(5)).await,
            UnregistrationOutcome::Skipped
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn load_missing_server_is_none() {
        let generator = ServerGenerator::new(temp_root());
        assert!(generator.load("nothing").is_none());
    }
}
