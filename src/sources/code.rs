use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use super::{location_anchor, suggest_for, EvidenceSource, ImpactStore, SearchFilters};
use crate::compose::{EvidenceItem, QueryType, SourceKind};
use crate::error::{SourceError, SourceResult};

/// Default cap on files read per search.
pub const DEFAULT_MAX_FILES: usize = 2_000;

/// Default cap on the size of a single scanned file.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 256 * 1024;

const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "build", "dist", "vendor", "__pycache__"];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "toml", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cc", "cpp",
    "hpp", "rb", "swift", "cs", "sql", "sh", "md", "yaml", "yml",
];

/// Bounded static scan of a project tree for query keywords.
///
/// With an [`ImpactStore`] attached, impact questions also get one item per
/// recorded dependent of every target the question names.
#[derive(Debug, Clone)]
pub struct CodeSource {
    root: PathBuf,
    max_files: usize,
    max_file_bytes: u64,
    impact: Option<Arc<ImpactStore>>,
}

impl CodeSource {
    /// Scan `root` with default limits.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_files: DEFAULT_MAX_FILES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            impact: None,
        }
    }

    /// Answer impact questions from a dependency graph as well.
    pub fn with_impact(mut self, impact: Arc<ImpactStore>) -> Self {
        self.impact = Some(impact);
        self
    }

    /// Override the file-count and file-size caps.
    pub fn with_limits(mut self, max_files: usize, max_file_bytes: u64) -> Self {
        self.max_files = max_files.max(1);
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Root directory being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl EvidenceSource for CodeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Code
    }

    async fn search(
        &self,
        query_text: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> SourceResult<Vec<EvidenceItem>> {
        let mut items = match (&self.impact, query_type) {
            (Some(impact), QueryType::Impact) => impact.evidence(query_text, filters),
            _ => Vec::new(),
        };
        if filters.keywords.is_empty() {
            return Ok(items);
        }
        if !self.root.is_dir() {
            if !items.is_empty() {
                debug!(root = %self.root.display(), "Project root missing, using dependency graph only");
                return Ok(items);
            }
            return Err(SourceError::Unavailable {
                source_kind: SourceKind::Code.to_string(),
                message: format!("project root {} is not a directory", self.root.display()),
            });
        }

        let scanner = self.clone();
        let keywords = filters.keywords.clone();
        let max_items = filters.max_items;
        let mut hits = tokio::task::spawn_blocking(move || scanner.scan(&keywords))
            .await
            .map_err(|e| SourceError::Unavailable {
                source_kind: SourceKind::Code.to_string(),
                message: format!("scan task failed: {}", e),
            })?;

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
        });
        hits.truncate(max_items.saturating_sub(items.len()));

        items.extend(hits.into_iter().map(|hit| hit.into_evidence(query_type)));
        Ok(items)
    }
}

#[derive(Debug)]
struct FileHit {
    path: String,
    line: usize,
    matched: Vec<String>,
    occurrences: usize,
    score: f64,
    modified: DateTime<Utc>,
}

impl FileHit {
    fn into_evidence(self, query_type: QueryType) -> EvidenceItem {
        let content = format!(
            "{} mentions {} ({} occurrence(s))",
            self.path,
            self.matched.join(", "),
            self.occurrences
        );
        let citation = format!("{}:{}", self.path, self.line);
        let item = EvidenceItem::new(SourceKind::Code, content, self.score, &citation, self.modified);
        match location_anchor(&citation) {
            Some(anchor) => item.with_suggestion(suggest_for(query_type, &anchor)),
            None => item,
        }
    }
}

impl CodeSource {
    fn scan(&self, keywords: &[String]) -> Vec<FileHit> {
        let mut hits = Vec::new();
        let mut scanned = 0usize;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref())
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_source_file(entry.path()) {
                continue;
            }
            if scanned >= self.max_files {
                debug!(max_files = self.max_files, "Code scan file cap reached");
                break;
            }

            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.len() > self.max_file_bytes {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            scanned += 1;

            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            if let Some(hit) = match_file(rel, &text, keywords, modified) {
                hits.push(hit);
            }
        }

        hits
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn match_file(
    path: String,
    text: &str,
    keywords: &[String],
    modified: DateTime<Utc>,
) -> Option<FileHit> {
    let lower_path = path.to_lowercase();
    let lower_text = text.to_lowercase();

    let mut matched = Vec::new();
    let mut occurrences = 0;
    let mut path_hit = false;
    for keyword in keywords {
        let in_path = lower_path.contains(keyword.as_str());
        let count = lower_text.matches(keyword.as_str()).count();
        if in_path || count > 0 {
            matched.push(keyword.clone());
            occurrences += count;
            path_hit |= in_path;
        }
    }
    if matched.is_empty() {
        return None;
    }

    let line = lower_text
        .lines()
        .position(|l| matched.iter().any(|k| l.contains(k.as_str())))
        .map(|i| i + 1)
        .unwrap_or(1);

    let mut score = 0.3 + 0.6 * matched.len() as f64 / keywords.len() as f64;
    if path_hit {
        score += 0.05;
    }

    Some(FileHit {
        path,
        line,
        matched,
        occurrences,
        score: score.min(0.95),
        modified,
    })
}
