//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arbor_analyzer::{scan_repository, IncrementalAnalyzer, IncrementalConfig, IncrementalResult};
use arbor_core::CodeGraph;
use arbor_engine::{CancelToken, EngineConfig, Reconciler, ReconcilerConfig, VirtualGraphEngine};
use arbor_parser::TreeSitterParser;
use arbor_watcher::RepoWatcher;
use serde::Deserialize;

/// Optional configuration file at the repository root.
const CONFIG_FILE: &str = ".arbor.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArborConfig {
    engine: EngineConfig,
    incremental: IncrementalConfig,
    reconciler: ReconcilerConfig,
}

impl ArborConfig {
    fn load(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(ArborConfig::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let config = toml::from_str(&text)?;
        tracing::info!("loaded configuration from {}", path.display());
        Ok(config)
    }
}

fn build_analyzer(root: &Path, config: ArborConfig) -> IncrementalAnalyzer {
    let parser = Arc::new(TreeSitterParser::new(root));
    let engine = VirtualGraphEngine::new(config.engine, Reconciler::new(config.reconciler));
    IncrementalAnalyzer::new(root, parser, engine, config.incremental)
}

pub async fn analyze(root: PathBuf) -> anyhow::Result<()> {
    let config = ArborConfig::load(&root)?;
    let mut analyzer = build_analyzer(&root, config);
    analyzer.initialize(CodeGraph::new()).await?;

    let paths = scan_repository(&root);
    tracing::info!("scanning {} candidate files", paths.len());

    let result = analyzer
        .analyze_changes(&CancelToken::none(), &paths)
        .await?;
    print_summary(&result);
    Ok(())
}

pub async fn watch(root: PathBuf, debounce_ms: u64) -> anyhow::Result<()> {
    let config = ArborConfig::load(&root)?;
    let mut analyzer = build_analyzer(&root, config);
    analyzer.initialize(CodeGraph::new()).await?;

    // Full pass first so the watcher starts from a complete graph.
    let paths = scan_repository(&root);
    let initial = analyzer
        .analyze_changes(&CancelToken::none(), &paths)
        .await?;
    print_summary(&initial);

    let mut watcher = RepoWatcher::new(&root, Duration::from_millis(debounce_ms))?;
    tracing::info!("watching for changes; press ctrl-c to stop");

    loop {
        tokio::select! {
            batch = watcher.next_batch() => {
                let Some(batch) = batch else { break };
                match analyzer.analyze_changes(&CancelToken::none(), &batch.paths).await {
                    Ok(result) => {
                        if !result.processed_changes.is_empty() {
                            print_summary(&result);
                        }
                    }
                    Err(error) => tracing::error!(%error, "incremental cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

pub async fn export(root: PathBuf, pretty: bool) -> anyhow::Result<()> {
    let config = ArborConfig::load(&root)?;
    let mut analyzer = build_analyzer(&root, config);
    analyzer.initialize(CodeGraph::new()).await?;

    let paths = scan_repository(&root);
    let result = analyzer
        .analyze_changes(&CancelToken::none(), &paths)
        .await?;

    let json = if pretty {
        serde_json::to_string_pretty(&result.updated_graph)?
    } else {
        serde_json::to_string(&result.updated_graph)?
    };
    println!("{}", json);
    Ok(())
}

fn print_summary(result: &IncrementalResult) {
    let graph = &result.updated_graph;
    println!(
        "{} files, {} symbols, {} edges ({} changes this cycle, risk {:.2})",
        graph.metadata.total_files,
        graph.metadata.total_symbols,
        graph.edge_count(),
        result.processed_changes.len(),
        result.impact_analysis.risk_score,
    );
    if !result.relationships.cycles.is_empty() {
        println!("circular dependencies:");
        for cycle in &result.relationships.cycles {
            println!("  {}", cycle.files.join(" -> "));
        }
    }
    if !result.relationships.hotspots.is_empty() {
        println!("hotspots:");
        for hotspot in result.relationships.hotspots.iter().take(10) {
            println!("  {:.1}  {}", hotspot.score, hotspot.path);
        }
    }
    if !result.relationships.isolates.is_empty() {
        println!("isolated files: {}", result.relationships.isolates.len());
    }
    for error in &result.errors {
        eprintln!("warning: {}: {}", error.path, error.message);
    }
}
