//! Line-oriented query server for one knowledge base.
//!
//! Each stdin line is a JSON request `{"query": "...", "limit": 5}`; each
//! answer is one JSON line on stdout, either `{"results": [...]}` or
//! `{"error": "..."}`. A bad request never stops the loop.

use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};
use sitekb_core::SearchService;
use sitekb_shared::SearchResult;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

const DEFAULT_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct ServeRequest {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ServeResponse {
    Results { results: Vec<SearchResult> },
    Error { error: String },
}

/// Serve `kb_name` on stdin/stdout until stdin closes.
pub(crate) async fn run(service: &SearchService, kb_name: &str) -> Result<()> {
    // Surface a missing KB or unusable embedder before reading any input.
    service.search(kb_name, "", 0).await?;
    info!(kb = kb_name, "query server ready");

    let reader = BufReader::new(tokio::io::stdin());
    serve_lines(service, kb_name, reader, tokio::io::stdout()).await
}

async fn serve_lines<R, W>(
    service: &SearchService,
    kb_name: &str,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ServeRequest>(line) {
            Ok(request) => match service.search(kb_name, &request.query, request.limit).await {
                Ok(results) => ServeResponse::Results { results },
                Err(e) => ServeResponse::Error {
                    error: e.to_string(),
                },
            },
            Err(e) => ServeResponse::Error {
                error: format!("invalid request: {e}"),
            },
        };
        debug!(?response, "answering request");

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}
