use std::path::{Path, PathBuf};

use bollard::auth::DockerCredentials;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::engine::{Engine, ImageEvent, ImageStream};
use crate::error::RunError;

const IGNORE_FILE: &str = ".dockerignore";

/// What to build and how to tag it.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildParams {
    /// Build context directory, relative to the code directory.
    pub build: String,
    pub tag: String,
    pub dockerfile: Option<String>,
}

/// Pack the build context `code_dir/build` into a tar archive.
///
/// The context must stay inside `code_dir`. Entries matched by the
/// context's `.dockerignore` are left out; the ignore file itself and the
/// Dockerfile are always kept.
pub fn pack_context(
    code_dir: &Path,
    build: &str,
    dockerfile: Option<&str>,
) -> Result<Vec<u8>, RunError> {
    let root = canonical(code_dir)?;
    let context = canonical(&code_dir.join(build))?;
    if !context.starts_with(&root) {
        return Err(RunError::user(format!(
            "build path {build} is outside {}",
            code_dir.display()
        )));
    }

    let ignore = IgnoreRules::load(&context)?;
    let dockerfile = dockerfile.unwrap_or("Dockerfile").trim_start_matches("./");
    let mut archive = tar::Builder::new(Vec::new());

    let mut walker = WalkDir::new(&context)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| RunError::user(format!("cannot read build context: {e}")))?;
        let rel = relative(&context, entry.path());
        let keep = rel == IGNORE_FILE || rel == dockerfile;
        if !keep && ignore.is_ignored(&rel) {
            debug!(path = %rel, "excluded by {IGNORE_FILE}");
            // Descend anyway when the Dockerfile lives below; its siblings
            // are still matched one by one.
            let holds_dockerfile = dockerfile
                .strip_prefix(rel.as_str())
                .is_some_and(|rest| rest.starts_with('/'));
            if entry.file_type().is_dir() && !holds_dockerfile {
                walker.skip_current_dir();
            }
            continue;
        }

        let appended = if entry.file_type().is_dir() {
            archive.append_dir(&rel, entry.path())
        } else {
            archive.append_path_with_name(entry.path(), &rel)
        };
        appended.map_err(|e| RunError::user(format!("cannot archive {rel}: {e}")))?;
    }

    archive
        .into_inner()
        .map_err(|e| RunError::user(format!("cannot finish build context: {e}")))
}

/// Build an image from `code_dir/params.build`, streaming the build log to
/// stdout. Returns the image tag.
pub async fn build(
    engine: &dyn Engine,
    code_dir: &Path,
    params: &BuildParams,
) -> Result<String, RunError> {
    let archive = pack_context(code_dir, &params.build, params.dockerfile.as_deref())?;
    info!(tag = %params.tag, bytes = archive.len(), "building image");

    let mut stream = engine.build_image(
        &params.tag,
        params.dockerfile.as_deref(),
        Bytes::from(archive),
    );
    let mut stdout = tokio::io::stdout();
    while let Some(item) = stream.next().await {
        let event = item.map_err(|e| RunError::engine("DOCKER BUILD ERROR", e))?;
        if let Some(error) = event.error {
            return Err(RunError::user(error));
        }
        if let Some(text) = event.stream {
            let _ = stdout.write_all(text.as_bytes()).await;
        }
    }
    let _ = stdout.flush().await;

    info!(tag = %params.tag, "image built");
    Ok(params.tag.clone())
}

/// Pull `image`, calling `on_progress` for every progress event.
pub async fn pull(
    engine: &dyn Engine,
    image: &str,
    auth: Option<DockerCredentials>,
    on_progress: impl FnMut(&ImageEvent),
) -> Result<Vec<ImageEvent>, RunError> {
    info!(image, "pulling image");
    follow_progress(engine.pull_image(image, auth), "ERROR: docker pull", on_progress).await
}

/// Push `image`, calling `on_progress` for every progress event.
pub async fn push(
    engine: &dyn Engine,
    image: &str,
    auth: Option<DockerCredentials>,
    on_progress: impl FnMut(&ImageEvent),
) -> Result<Vec<ImageEvent>, RunError> {
    info!(image, "pushing image");
    follow_progress(engine.push_image(image, auth), "ERROR: docker push", on_progress).await
}

/// Drive a progress stream to completion and return every event seen.
/// The first error event ends the stream with a failure.
pub async fn follow_progress(
    mut stream: ImageStream<'_>,
    context: &str,
    mut on_progress: impl FnMut(&ImageEvent),
) -> Result<Vec<ImageEvent>, RunError> {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        let event = item.map_err(|e| RunError::engine(context, e))?;
        if let Some(error) = &event.error {
            return Err(RunError::user(format!("{context}: {error}")));
        }
        on_progress(&event);
        events.push(event);
    }
    Ok(events)
}

fn canonical(path: &Path) -> Result<PathBuf, RunError> {
    path.canonicalize()
        .map_err(|e| RunError::user(format!("cannot resolve {}: {e}", path.display())))
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Patterns from a `.dockerignore`. Later patterns override earlier ones and
/// a leading `!` re-includes.
#[derive(Debug, Default)]
struct IgnoreRules {
    patterns: Vec<(bool, String)>,
}

impl IgnoreRules {
    fn load(context: &Path) -> Result<Self, RunError> {
        let path = context.join(IGNORE_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| RunError::user(format!("cannot read {}: {e}", path.display())))?;
        Ok(Self::parse(&text))
    }

    fn parse(text: &str) -> Self {
        let patterns = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| match l.strip_prefix('!') {
                Some(rest) => (false, normalize_pattern(rest)),
                None => (true, normalize_pattern(l)),
            })
            .filter(|(_, p)| !p.is_empty())
            .collect();
        Self { patterns }
    }

    fn is_ignored(&self, rel: &str) -> bool {
        let mut ignored = false;
        for (exclude, pattern) in &self.patterns {
            if matches_path(pattern, rel) {
                ignored = *exclude;
            }
        }
        ignored
    }
}

fn normalize_pattern(p: &str) -> String {
    p.trim().trim_start_matches("./").trim_matches('/').to_string()
}

/// A pattern matches the path itself or any directory above it.
fn matches_path(pattern: &str, rel: &str) -> bool {
    if glob(pattern.as_bytes(), rel.as_bytes()) {
        return true;
    }
    rel.match_indices('/')
        .any(|(idx, _)| glob(pattern.as_bytes(), rel[..idx].as_bytes()))
}

/// `*` and `?` stay within one path segment; `**` crosses segments.
fn glob(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(&b'*'), _) if pattern.get(1) == Some(&b'*') => {
            let rest = pattern[2..].strip_prefix(b"/").unwrap_or(&pattern[2..]);
            (0..=text.len()).any(|i| glob(rest, &text[i..]))
        }
        (Some(&b'*'), _) => {
            let rest = &pattern[1..];
            let segment = text.iter().position(|&c| c == b'/').unwrap_or(text.len());
            (0..=segment).any(|i| glob(rest, &text[i..]))
        }
        (Some(&b'?'), Some(&c)) if c != b'/' => glob(&pattern[1..], &text[1..]),
        (Some(&p), Some(&c)) if p == c => glob(&pattern[1..], &text[1..]),
        _ => false,
    }
}
