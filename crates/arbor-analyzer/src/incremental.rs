//! The incremental analyzer
//!
//! Outer loop of the engine: detects file changes, drives the parser,
//! emits change sets into the virtual graph engine, and reports impact.
//! One file failing never aborts the cycle; its error is carried in the
//! result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use arbor_core::{CodeGraph, FileNode, Symbol};
use arbor_engine::{
    CancelToken, ChangeSet, EngineError, SymbolChangeSet, VirtualGraphEngine,
};
use arbor_parser::{has_generated_marker, is_skipped_path, ParserError, SourceAst, SourceParser};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::AstCache;
use crate::config::IncrementalConfig;
use crate::detect::{self, FileChange, FileChangeKind};
use crate::impact::{self, ProcessedChange};
use crate::relationships;
use crate::result::{AnalysisError, IncrementalResult, PerformanceMetrics};

pub struct IncrementalAnalyzer {
    root: PathBuf,
    parser: Arc<dyn SourceParser>,
    engine: VirtualGraphEngine,
    config: IncrementalConfig,
    /// Path → version token snapshot from the last cycle.
    file_versions: HashMap<String, String>,
    /// Path → full content hash; feeds rename pairing.
    content_hashes: HashMap<String, String>,
    ast_cache: AstCache,
}

/// A parsed, extracted view of one added or modified file.
struct ParsedFile {
    ast: SourceAst,
    file: FileNode,
    symbols: Vec<Symbol>,
    content_hash: String,
}

impl IncrementalAnalyzer {
    pub fn new(
        root: impl Into<PathBuf>,
        parser: Arc<dyn SourceParser>,
        engine: VirtualGraphEngine,
        config: IncrementalConfig,
    ) -> Self {
        // Every apply republishes derived relationships, including the
        // background applies the engine triggers on its own queue
        // threshold.
        engine.set_post_apply_hook(Arc::new(|graph| {
            relationships::recompute(graph);
        }));
        let cache_capacity = config.max_cache_size;
        IncrementalAnalyzer {
            root: root.into(),
            parser,
            engine,
            config,
            file_versions: HashMap::new(),
            content_hashes: HashMap::new(),
            ast_cache: AstCache::new(cache_capacity),
        }
    }

    pub fn engine(&self) -> &VirtualGraphEngine {
        &self.engine
    }

    pub fn config(&self) -> &IncrementalConfig {
        &self.config
    }

    /// Seed the engine with an existing graph and snapshot the version map
    /// for every file it contains.
    pub async fn initialize(&mut self, actual: CodeGraph) -> Result<(), EngineError> {
        let paths: Vec<String> = actual.files().map(|f| f.path.clone()).collect();
        self.engine.initialize(actual).await;

        self.file_versions.clear();
        self.content_hashes.clear();
        for path in paths {
            match detect::file_version(
                &self.root,
                Path::new(&path),
                self.config.change_detection,
            )
            .await
            {
                Ok(Some(version)) => {
                    self.file_versions.insert(path, version);
                }
                Ok(None) => {}
                Err(e) => warn!(file = %path, error = %e, "version snapshot failed"),
            }
        }
        Ok(())
    }

    /// Classify the given paths against the version snapshot without
    /// touching the graph.
    pub async fn detect_changes(&self, paths: &[PathBuf]) -> std::io::Result<Vec<FileChange>> {
        let candidates: Vec<PathBuf> = paths
            .iter()
            .filter(|p| !is_skipped_path(p))
            .cloned()
            .collect();
        detect::detect_changes(
            &self.root,
            &candidates,
            &self.file_versions,
            self.config.change_detection,
        )
        .await
    }

    /// Run one full incremental cycle over the given paths.
    pub async fn analyze_changes(
        &mut self,
        cancel: &CancelToken,
        paths: &[PathBuf],
    ) -> Result<IncrementalResult, EngineError> {
        let total_started = Instant::now();
        let mut errors: Vec<AnalysisError> = Vec::new();

        // ── Detection ───────────────────────────────────
        let detect_started = Instant::now();
        let raw_changes = self
            .detect_changes(paths)
            .await
            .map_err(|e| EngineError::Parse {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })?;
        let detect_elapsed = detect_started.elapsed();
        cancel.check()?;

        if raw_changes.is_empty() {
            return self.finish_cycle(total_started, detect_elapsed, Vec::new(), errors).await;
        }

        // ── Parse added/modified content ────────────────
        let parse_started = Instant::now();
        let mut parsed: HashMap<String, ParsedFile> = HashMap::new();
        let to_parse: Vec<String> = raw_changes
            .iter()
            .filter(|c| !matches!(c.kind, FileChangeKind::Removed))
            .map(|c| c.path.clone())
            .collect();
        let parse_outcomes = self.parse_files(&to_parse).await;
        for (path, outcome) in parse_outcomes {
            match outcome {
                Ok(file) => {
                    parsed.insert(path, file);
                }
                Err(ParserError::UnsupportedLanguage { .. }) => {
                    // Outside the language whitelist; skipped silently.
                }
                Err(error) => {
                    warn!(file = %path, %error, "parse failed; prior graph slice preserved");
                    errors.push(AnalysisError {
                        path,
                        kind: "parse".to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
        let parse_elapsed = parse_started.elapsed();
        cancel.check()?;

        // ── Rename pairing ──────────────────────────────
        let added_hashes: HashMap<String, String> = parsed
            .iter()
            .map(|(path, file)| (path.clone(), file.content_hash.clone()))
            .collect();
        let changes = detect::pair_renames(raw_changes, &self.content_hashes, &added_hashes);

        // ── Emit change sets ────────────────────────────
        let diff_started = Instant::now();
        let prior = self.engine.get_actual_graph().await;
        let mut processed: Vec<ProcessedChange> = Vec::new();

        for change in changes {
            cancel.check()?;
            match &change.kind {
                FileChangeKind::Removed => {
                    self.queue_or_record(
                        ChangeSet::file_delete(&change.path, prior.file(&change.path)),
                        &change.path,
                        &mut errors,
                    );
                    let symbols_touched = prior
                        .file(&change.path)
                        .map(|f| f.symbols.len())
                        .unwrap_or(0);
                    self.forget_file(&change.path);
                    processed.push(ProcessedChange {
                        change,
                        structural: true,
                        symbols_touched,
                    });
                }
                FileChangeKind::Added => {
                    let Some(parsed_file) = parsed.remove(&change.path) else {
                        continue;
                    };
                    let symbols_touched = parsed_file.symbols.len();
                    self.queue_or_record(
                        ChangeSet::file_add(&parsed_file.file, &parsed_file.symbols),
                        &change.path,
                        &mut errors,
                    );
                    self.remember_file(parsed_file);
                    processed.push(ProcessedChange {
                        change,
                        structural: true,
                        symbols_touched,
                    });
                }
                FileChangeKind::Renamed { from } => {
                    let Some(parsed_file) = parsed.remove(&change.path) else {
                        continue;
                    };
                    self.queue_or_record(
                        ChangeSet::file_delete(from, prior.file(from)),
                        from,
                        &mut errors,
                    );
                    let symbols_touched = parsed_file.symbols.len();
                    self.queue_or_record(
                        ChangeSet::file_add(&parsed_file.file, &parsed_file.symbols),
                        &change.path,
                        &mut errors,
                    );
                    self.forget_file(from);
                    self.remember_file(parsed_file);
                    processed.push(ProcessedChange {
                        change,
                        structural: false,
                        symbols_touched,
                    });
                }
                FileChangeKind::Modified => {
                    let Some(parsed_file) = parsed.remove(&change.path) else {
                        continue;
                    };
                    let (structural, symbols_touched) =
                        self.emit_modification(&parsed_file, &mut errors);
                    self.remember_file(parsed_file);
                    processed.push(ProcessedChange {
                        change,
                        structural,
                        symbols_touched,
                    });
                }
            }
        }
        let diff_elapsed = diff_started.elapsed();
        self.engine.record_diff_duration(diff_elapsed);

        // ── Reconcile ───────────────────────────────────
        let engine_started = Instant::now();
        let report = self.engine.process_pending_changes(cancel).await?;
        for engine_error in report.errors {
            errors.push(AnalysisError {
                path: String::new(),
                kind: "change".to_string(),
                message: engine_error.to_string(),
            });
        }
        let engine_elapsed = engine_started.elapsed();
        info!(
            changes = processed.len(),
            patches = report.patches_applied,
            "incremental cycle reconciled"
        );

        self.finish_cycle_with(
            total_started,
            PerformanceStages {
                detect: detect_elapsed,
                parse: parse_elapsed,
                diff: diff_elapsed,
                engine: engine_elapsed,
            },
            processed,
            errors,
        )
        .await
    }

    // ── Parsing ─────────────────────────────────────────

    /// Read and parse a batch of repository-relative paths. Ordering is
    /// preserved through the returned pairs.
    async fn parse_files(
        &self,
        paths: &[String],
    ) -> Vec<(String, Result<ParsedFile, ParserError>)> {
        if self.config.parallel_processing && paths.len() > 1 {
            let mut join_set = JoinSet::new();
            for path in paths.iter().cloned() {
                let parser = self.parser.clone();
                let root = self.root.clone();
                join_set
                    .spawn(async move { (path.clone(), parse_one(&root, parser.as_ref(), &path).await) });
            }
            let mut by_path: HashMap<String, Result<ParsedFile, ParserError>> = HashMap::new();
            while let Some(joined) = join_set.join_next().await {
                if let Ok((path, outcome)) = joined {
                    by_path.insert(path, outcome);
                }
            }
            paths
                .iter()
                .filter_map(|path| by_path.remove(path).map(|outcome| (path.clone(), outcome)))
                .collect()
        } else {
            let mut out = Vec::with_capacity(paths.len());
            for path in paths {
                out.push((
                    path.clone(),
                    parse_one(&self.root, self.parser.as_ref(), path).await,
                ));
            }
            out
        }
    }

    // ── Modification pipeline ───────────────────────────

    /// Emit the change sets for a modified file: granular symbol changes
    /// when a cached prior AST allows a diff, otherwise a full slice
    /// replacement. Returns (structural, symbols touched).
    fn emit_modification(
        &self,
        parsed_file: &ParsedFile,
        errors: &mut Vec<AnalysisError>,
    ) -> (bool, usize) {
        let path = parsed_file.file.path.clone();

        // With the virtual-graph fine-grain path disabled, every
        // modification is a whole-slice replacement.
        if !self.config.enable_vge {
            self.queue_full_replace(parsed_file, errors);
            return (true, parsed_file.symbols.len());
        }

        let old_ast = self.ast_cache.get(&path);
        let Some(old_ast) = old_ast else {
            self.queue_full_replace(parsed_file, errors);
            return (true, parsed_file.symbols.len());
        };

        let diff = match self.engine.differ().diff(&old_ast, &parsed_file.ast) {
            Ok(diff) => diff,
            Err(error) => {
                debug!(file = %path, %error, "diff failed; falling back to full replace");
                self.queue_full_replace(parsed_file, errors);
                return (true, parsed_file.symbols.len());
            }
        };

        let old_symbols = self.parser.extract_symbols(&old_ast);
        let symbol_changes: SymbolChangeSet =
            arbor_engine::classify_symbols(&old_symbols, &parsed_file.symbols);
        let touched = symbol_changes.change_count();

        // Granular sets first, then the file record pruning stale listings.
        for deleted in &symbol_changes.deleted {
            self.queue_or_record(
                ChangeSet::symbol_delete(&path, &deleted.id, Some(deleted)),
                &path,
                errors,
            );
        }
        for rename in &symbol_changes.renamed {
            self.queue_or_record(
                ChangeSet::symbol_rename(&path, &rename.old, &rename.new, rename.confidence),
                &path,
                errors,
            );
        }
        for (before, after) in &symbol_changes.modified {
            self.queue_or_record(
                ChangeSet::symbol_modify(&path, Some(before), after),
                &path,
                errors,
            );
        }
        for added in &symbol_changes.added {
            self.queue_or_record(ChangeSet::symbol_add(&path, added), &path, errors);
        }
        self.queue_or_record(
            ChangeSet::file_modify(None, &parsed_file.file, &[]),
            &path,
            errors,
        );

        (diff.structural_changes, touched)
    }

    fn queue_full_replace(&self, parsed_file: &ParsedFile, errors: &mut Vec<AnalysisError>) {
        self.queue_or_record(
            ChangeSet::file_modify(None, &parsed_file.file, &parsed_file.symbols),
            &parsed_file.file.path,
            errors,
        );
    }

    fn queue_or_record(
        &self,
        change: Result<ChangeSet, EngineError>,
        path: &str,
        errors: &mut Vec<AnalysisError>,
    ) {
        let outcome = change.and_then(|set| self.engine.queue_change(set));
        if let Err(error) = outcome {
            warn!(file = %path, %error, "change set dropped");
            errors.push(AnalysisError {
                path: path.to_string(),
                kind: "change".to_string(),
                message: error.to_string(),
            });
        }
    }

    // ── Bookkeeping ─────────────────────────────────────

    fn remember_file(&mut self, parsed_file: ParsedFile) {
        let path = parsed_file.file.path.clone();
        self.content_hashes
            .insert(path.clone(), parsed_file.content_hash.clone());
        self.file_versions.insert(
            path,
            version_token(&parsed_file, self.config.change_detection),
        );
        if self.config.cache_enabled && self.config.enable_vge {
            self.ast_cache.put(parsed_file.ast);
        }
    }

    fn forget_file(&mut self, path: &str) {
        self.file_versions.remove(path);
        self.content_hashes.remove(path);
        self.ast_cache.remove(path);
        self.engine.differ().invalidate_path(path);
    }

    // ── Cycle assembly ──────────────────────────────────

    async fn finish_cycle(
        &mut self,
        total_started: Instant,
        detect_elapsed: Duration,
        processed: Vec<ProcessedChange>,
        errors: Vec<AnalysisError>,
    ) -> Result<IncrementalResult, EngineError> {
        self.finish_cycle_with(
            total_started,
            PerformanceStages {
                detect: detect_elapsed,
                parse: Duration::ZERO,
                diff: Duration::ZERO,
                engine: Duration::ZERO,
            },
            processed,
            errors,
        )
        .await
    }

    async fn finish_cycle_with(
        &mut self,
        total_started: Instant,
        stages: PerformanceStages,
        processed: Vec<ProcessedChange>,
        errors: Vec<AnalysisError>,
    ) -> Result<IncrementalResult, EngineError> {
        let relationships_started = Instant::now();
        let analysis_duration = total_started.elapsed();
        let (relationship_metrics, updated_graph) = self
            .engine
            .with_actual_mut(move |graph| {
                let metrics = relationships::recompute(graph);
                graph.metadata.generated_at = chrono::Utc::now();
                graph.metadata.analysis_duration = analysis_duration;
                (metrics, graph.deep_copy())
            })
            .await;
        let relationships_elapsed = relationships_started.elapsed();

        let changed_paths: Vec<String> =
            processed.iter().map(|p| p.change.path.clone()).collect();
        let dependents = relationships::dependents_within(
            &updated_graph,
            &changed_paths,
            self.config.incremental_depth,
        );
        let impact_analysis = impact::summarize(&processed, dependents);

        let engine_metrics = self.engine.get_metrics();
        let performance_metrics = PerformanceMetrics {
            total: total_started.elapsed(),
            detect: stages.detect,
            parse: stages.parse,
            diff: stages.diff,
            engine: stages.engine,
            relationships: relationships_elapsed,
            files_processed: processed.len(),
            cache_hit_rate: self.ast_cache.hit_rate(),
            memory_bytes: engine_metrics.shadow_memory_bytes,
        };

        Ok(IncrementalResult {
            updated_graph,
            processed_changes: processed.into_iter().map(|p| p.change).collect(),
            impact_analysis,
            relationships: relationship_metrics,
            performance_metrics,
            errors,
        })
    }
}

struct PerformanceStages {
    detect: Duration,
    parse: Duration,
    diff: Duration,
    engine: Duration,
}

/// Read, classify, parse, and extract a single file.
async fn parse_one(
    root: &Path,
    parser: &dyn SourceParser,
    rel_path: &str,
) -> Result<ParsedFile, ParserError> {
    let path = Path::new(rel_path);
    let classification = parser.classify(path)?;

    let absolute = root.join(path);
    let content = tokio::fs::read_to_string(&absolute)
        .await
        .map_err(|source| ParserError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let modified_at = tokio::fs::metadata(&absolute)
        .await
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let content_hash = detect::content_hash(&content);
    let size_bytes = content.len() as u64;
    let line_count = content.lines().count() as u32;
    let is_generated = classification.is_generated || has_generated_marker(&content);

    let ast = parser
        .parse_content(path, classification.language, content)
        .await?;
    let symbols = parser.extract_symbols(&ast);
    let imports = parser.extract_imports(&ast);

    let file = FileNode {
        path: rel_path.to_string(),
        language: classification.language,
        size_bytes,
        line_count,
        symbol_count: symbols.len() as u32,
        import_count: imports.len() as u32,
        is_test: classification.is_test,
        is_generated,
        modified_at,
        symbols: symbols.iter().map(|s| s.id.clone()).collect(),
        imports,
    };

    Ok(ParsedFile {
        ast,
        file,
        symbols,
        content_hash,
    })
}

fn version_token(parsed_file: &ParsedFile, mode: crate::config::ChangeDetection) -> String {
    use crate::config::ChangeDetection;
    match mode {
        ChangeDetection::Mtime => {
            let nanos = parsed_file
                .file
                .modified_at
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            format!("mtime-{}", nanos)
        }
        ChangeDetection::Hash => parsed_file.content_hash[..32].to_string(),
        ChangeDetection::Content => parsed_file.content_hash.clone(),
    }
}
