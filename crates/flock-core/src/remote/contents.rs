//! Repository file uploads through the GitHub contents API.
//!
//! One target is one file in one repository, so a folder pushed to twenty
//! repositories resumes file by file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ignore::WalkBuilder;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{FlockError, Result};
use crate::orchestrator::{ActionInvoker, InvocationError, InvokeResult, Target};

use super::github::GitHubClient;
use super::{decode_body, json_body, parse_payload, read_body, transport_error};

pub const UPLOAD_FILE: &str = "upload-file";

/// Largest file flock will push; the contents API degrades well before its own limit.
pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Per-target payload for `upload-file`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileUpload {
    pub repo: String,
    /// Destination path inside the repository, `/`-separated.
    pub path: String,
    /// Local file, read when the target runs.
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Branch to commit to; the repository's default branch when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl FileUpload {
    pub fn target_id(&self) -> String {
        format!("{}/{}", self.repo, self.path)
    }

    pub fn into_target(self) -> Result<Target> {
        let id = self.target_id();
        Ok(Target::new(id, serde_json::to_value(self)?))
    }

    fn commit_message(&self) -> String {
        if self.message.is_empty() {
            format!("Add {} via flock", self.path)
        } else {
            self.message.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Planning helpers
// ---------------------------------------------------------------------------

/// Validate a repository path and strip surrounding slashes.
pub fn normalize_repo_path(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    let bad = trimmed.contains(|c: char| matches!(c, '\\' | '?' | '#'))
        || trimmed
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if trimmed.is_empty() || bad {
        return Err(FlockError::Configuration(format!(
            "'{path}' is not a usable repository path"
        )));
    }
    Ok(trimmed.to_string())
}

/// Pair every file under `src` with its destination path under `dest`.
///
/// A single file lands at `dest`, or inside it when `dest` ends in `/` or is
/// empty. A directory is walked recursively with `.gitignore` honoured and
/// `.git/` skipped; dotfiles such as `.github/` are included. Results are
/// sorted by destination.
pub fn collect_files(src: &Path, dest: &str) -> Result<Vec<(PathBuf, String)>> {
    let meta = std::fs::metadata(src)?;
    if meta.is_file() {
        let dest = if dest.is_empty() || dest.ends_with('/') {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{dest}{name}")
        } else {
            dest.to_string()
        };
        return Ok(vec![(src.to_path_buf(), normalize_repo_path(&dest)?)]);
    }

    let prefix = dest.trim_matches('/');
    let mut files = Vec::new();
    let walker = WalkBuilder::new(src)
        .hidden(false)
        .git_global(false)
        .filter_entry(|e| e.file_name() != ".git")
        .build();
    for entry in walker {
        let entry = entry.map_err(|e| FlockError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| FlockError::Io(std::io::Error::other(e)))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let joined = if prefix.is_empty() {
            rel
        } else {
            format!("{prefix}/{rel}")
        };
        files.push((entry.path().to_path_buf(), normalize_repo_path(&joined)?));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Read a source file for upload, refusing anything over `MAX_FILE_BYTES`.
fn read_source(path: &Path) -> std::result::Result<Vec<u8>, InvocationError> {
    let unreadable =
        |e: std::io::Error| InvocationError::rejected(format!("cannot read {}: {e}", path.display()));
    let size = std::fs::metadata(path).map_err(unreadable)?.len();
    if size > MAX_FILE_BYTES {
        return Err(InvocationError::rejected(format!(
            "{} is {:.1} MiB; the limit is {} MiB",
            path.display(),
            size as f64 / (1024.0 * 1024.0),
            MAX_FILE_BYTES / (1024 * 1024)
        )));
    }
    std::fs::read(path).map_err(unreadable)
}

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

impl GitHubClient {
    fn contents_path(&self, repo: &str, path: &str) -> String {
        format!("/repos/{}/{}/contents/{}", self.owner(), repo, path)
    }

    pub fn get_contents(&self, repo: &str, path: &str, branch: Option<&str>) -> InvokeResult {
        let mut request = self.request(reqwest::Method::GET, &self.contents_path(repo, path));
        if let Some(branch) = branch {
            request = request.query(&[("ref", branch)]);
        }
        json_body(request.send().map_err(transport_error)?)
    }

    fn put_contents(
        &self,
        upload: &FileUpload,
        encoded: &str,
        sha: Option<&str>,
    ) -> std::result::Result<(StatusCode, String), InvocationError> {
        let mut body = json!({
            "message": upload.commit_message(),
            "content": encoded,
        });
        if let Some(branch) = &upload.branch {
            body["branch"] = json!(branch);
        }
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }
        let response = self
            .request(reqwest::Method::PUT, &self.contents_path(&upload.repo, &upload.path))
            .json(&body)
            .send()
            .map_err(transport_error)?;
        read_body(response)
    }

    /// Create the file, or replace it when its content differs.
    ///
    /// An existing path makes GitHub answer 422 and ask for the current blob
    /// sha. When the stored content already matches nothing is committed and
    /// the result carries `"unchanged": true`.
    pub fn upload_file(&self, upload: &FileUpload, content: &[u8]) -> InvokeResult {
        let encoded = STANDARD.encode(content);
        let (status, text) = self.put_contents(upload, &encoded, None)?;
        if !(status == StatusCode::UNPROCESSABLE_ENTITY && text.contains("sha")) {
            let body = decode_body(status, &text)?;
            return Ok(upload_result(upload, &body));
        }

        let current = self.get_contents(&upload.repo, &upload.path, upload.branch.as_deref())?;
        let sha = current["sha"].as_str().unwrap_or_default();
        if stored_content(&current).as_deref() == Some(content) {
            debug!(repo = %upload.repo, path = %upload.path, "content unchanged, skipping commit");
            return Ok(json!({ "path": upload.path, "sha": sha, "unchanged": true }));
        }

        let (status, text) = self.put_contents(upload, &encoded, Some(sha))?;
        let body = decode_body(status, &text)?;
        Ok(upload_result(upload, &body))
    }
}

fn upload_result(upload: &FileUpload, body: &serde_json::Value) -> serde_json::Value {
    json!({
        "path": upload.path,
        "sha": body["content"]["sha"],
        "commit": body["commit"]["sha"],
    })
}

/// Decoded file bytes from a contents response. GitHub wraps the base64.
fn stored_content(current: &serde_json::Value) -> Option<Vec<u8>> {
    if current["encoding"].as_str() != Some("base64") {
        return None;
    }
    let packed: String = current["content"]
        .as_str()?
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD.decode(packed).ok()
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Pushes one local file to one repository path.
pub struct UploadFile {
    client: Arc<GitHubClient>,
}

impl UploadFile {
    pub fn new(client: Arc<GitHubClient>) -> Self {
        Self { client }
    }
}

impl ActionInvoker for UploadFile {
    fn action(&self) -> &str {
        UPLOAD_FILE
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        let upload: FileUpload = parse_payload(&target.payload)?;
        if upload.repo.is_empty() {
            return Err(InvocationError::rejected("upload payload has no 'repo'"));
        }
        normalize_repo_path(&upload.path).map_err(|e| InvocationError::rejected(e.to_string()))?;
        let content = read_source(&upload.source)?;
        self.client.upload_file(&upload, &content)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
