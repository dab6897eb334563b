use anyhow::{Context, bail};
use std::path::PathBuf;

use engram_engine::{BenchmarkReport, EpisodeResult, ReconstructRequest, ReconstructScope};
use engram_runtime::{ForgetRequest, IngestOptions, MemoryStore, QueryOptions, Registry};

use crate::args::OutputFormat;
use crate::output;

pub fn ingest(
    store: &MemoryStore,
    path: Option<PathBuf>,
    project: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let root = match path.or_else(|| store.config().transcript_root.clone()) {
        Some(root) => root,
        None => bail!("no transcript root: pass a path or set transcript_root in config.toml"),
    };

    let report = store
        .ingest_root(
            &root,
            &IngestOptions {
                project_override: project,
            },
        )
        .with_context(|| format!("ingesting {}", root.display()))?;

    if format == OutputFormat::Json {
        return output::print_json(&report);
    }

    output::heading("Ingest");
    output::key_value("sessions", report.sessions_ingested);
    output::key_value("skipped", report.sessions_skipped);
    output::key_value("chunks", report.chunks);
    output::key_value("edges", report.edges);
    output::key_value("cross-session edges", report.cross_session_edges);
    for error in &report.errors {
        output::note(&format!("  failed {}: {}", error.session_id, error.error));
    }
    Ok(())
}

pub fn search(
    store: &MemoryStore,
    query: &str,
    opts: QueryOptions,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let response = store.search(query, &opts)?;
    if format == OutputFormat::Json {
        return output::print_json(&response);
    }

    if response.chunks.is_empty() {
        output::note("no matches");
        return Ok(());
    }
    for hit in &response.chunks {
        println!(
            "{:>6.3}  {}  [{}] {}  {}",
            hit.score, hit.chunk_id, hit.source, hit.start_ts, hit.preview
        );
    }
    output::note(&format!("{} tokens", response.token_count));
    Ok(())
}

pub fn episode(result: EpisodeResult, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return output::print_json(&result);
    }

    match result {
        EpisodeResult::Chain {
            text,
            token_count,
            chain_length,
            ..
        } => {
            println!("{}", text);
            output::note(&format!("chain of {} | {} tokens", chain_length, token_count));
        }
        EpisodeResult::SearchFallback {
            text,
            diagnostics,
            token_count,
            ..
        } => {
            if !text.is_empty() {
                println!("{}", text);
            }
            output::note(&format!(
                "search fallback ({}) | {} hits | {} tokens",
                diagnostics.reason, diagnostics.search_hits, token_count
            ));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn reconstruct(
    store: &MemoryStore,
    project: String,
    session_id: Option<String>,
    from: Option<String>,
    to: Option<String>,
    days_back: Option<f64>,
    previous_session: bool,
    max_tokens: Option<usize>,
    keep_oldest: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let scope = if let Some(session_id) = session_id {
        ReconstructScope::Session(session_id)
    } else if let Some(days) = days_back {
        ReconstructScope::DaysBack(days)
    } else if previous_session {
        ReconstructScope::PreviousSession
    } else {
        ReconstructScope::Window { from, to }
    };

    let response = store.reconstruct(&ReconstructRequest {
        project,
        scope,
        max_tokens: max_tokens.unwrap_or(store.config().tokens.mcp_max_response),
        keep_newest: !keep_oldest,
    })?;

    if format == OutputFormat::Json {
        return output::print_json(&response);
    }
    println!("{}", response.text);
    output::note(&format!(
        "{} sessions | {} chunks | {} tokens{}",
        response.sessions.len(),
        response.chunk_ids.len(),
        response.total_tokens,
        if response.truncated { " | truncated" } else { "" }
    ));
    Ok(())
}

pub fn projects(store: &MemoryStore, format: OutputFormat) -> anyhow::Result<()> {
    let projects = store.list_projects()?;
    if format == OutputFormat::Json {
        return output::print_json(&projects);
    }
    if projects.is_empty() {
        output::note("no projects indexed");
        return Ok(());
    }
    for project in projects {
        println!(
            "{}  {} chunks  {} .. {}",
            project.project, project.chunk_count, project.first_seen, project.last_seen
        );
    }
    Ok(())
}

pub fn sessions(
    store: &MemoryStore,
    project: &str,
    from: Option<&str>,
    to: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let sessions = store.list_sessions(project, from, to)?;
    if format == OutputFormat::Json {
        return output::print_json(&sessions);
    }
    if sessions.is_empty() {
        output::note("no sessions in range");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {} chunks  {} tokens  {} .. {}",
            session.session_id,
            session.chunk_count,
            session.total_tokens,
            session.first_chunk_time,
            session.last_chunk_time
        );
    }
    Ok(())
}

pub fn forget(store: &MemoryStore, req: ForgetRequest, format: OutputFormat) -> anyhow::Result<()> {
    let summary = store.forget(&req)?;
    if format == OutputFormat::Json {
        return output::print_json(&summary);
    }
    if summary.dry_run {
        output::heading(&format!("{} chunk(s) would be deleted", summary.matched));
        for id in &summary.chunk_ids {
            println!("  {}", id);
        }
    } else {
        output::heading(&format!("deleted {} chunk(s)", summary.deleted));
    }
    Ok(())
}

pub fn stats(store: &MemoryStore, format: OutputFormat) -> anyhow::Result<()> {
    let stats = store.stats()?;
    if format == OutputFormat::Json {
        return output::print_json(&stats);
    }
    output::heading("Store");
    output::key_value("chunks", stats.chunks);
    output::key_value("edges", stats.edges);
    output::key_value("clusters", stats.clusters);
    for (kind, count) in &stats.edge_kinds {
        output::key_value(&format!("edges[{}]", kind), count);
    }
    for project in &stats.projects {
        output::key_value(&project.project, format!("{} chunks", project.chunk_count));
    }
    Ok(())
}

pub fn recluster(
    store: &MemoryStore,
    project: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let summary = store.recluster(project)?;
    if format == OutputFormat::Json {
        return output::print_json(&summary);
    }
    output::heading("Recluster");
    output::key_value("clusters", summary.clusters);
    output::key_value("clustered chunks", summary.clustered);
    output::key_value("noise", summary.noise);
    Ok(())
}

pub fn bench(
    store: &MemoryStore,
    project: Option<&str>,
    csv_path: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let report = store.benchmark(project)?;

    if let Some(path) = csv_path {
        write_bench_csv(&report, &path)?;
        output::note(&format!("csv written to {}", path.display()));
    }
    if format == OutputFormat::Json {
        return output::print_json(&report);
    }

    output::heading("Benchmark");
    output::key_value("chunks", report.chunk_count);
    output::key_value("clusters", report.cluster_health.clusters);
    output::key_value("coverage", format!("{:.2}", report.cluster_health.coverage));
    output::key_value(
        "hit rate@k",
        format!("{:.2}", report.retrieval_quality.hit_rate_at_k),
    );
    output::key_value(
        "mrr",
        format!("{:.2}", report.retrieval_quality.mean_reciprocal_rank),
    );
    output::key_value("p50", format!("{:.1}ms", report.latency.p50_ms));
    output::key_value("p95", format!("{:.1}ms", report.latency.p95_ms));
    for advice in &report.advice {
        output::note(&format!("  advice: {}", advice));
    }
    Ok(())
}

fn write_bench_csv(report: &BenchmarkReport, path: &PathBuf) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["metric", "value"])?;
    writer.write_record(["chunks", &report.chunk_count.to_string()])?;
    writer.write_record(["clusters", &report.cluster_health.clusters.to_string()])?;
    writer.write_record(["coverage", &format!("{:.4}", report.cluster_health.coverage)])?;
    writer.write_record([
        "mean_member_distance",
        &format!("{:.4}", report.cluster_health.mean_member_distance),
    ])?;
    writer.write_record([
        "noise_fraction",
        &format!("{:.4}", report.cluster_health.noise_fraction),
    ])?;
    writer.write_record([
        "hit_rate_at_k",
        &format!("{:.4}", report.retrieval_quality.hit_rate_at_k),
    ])?;
    writer.write_record([
        "mrr",
        &format!("{:.4}", report.retrieval_quality.mean_reciprocal_rank),
    ])?;
    writer.write_record(["p50_ms", &format!("{:.2}", report.latency.p50_ms)])?;
    writer.write_record(["p95_ms", &format!("{:.2}", report.latency.p95_ms)])?;
    writer.flush()?;
    Ok(())
}

pub fn tools_list(format: OutputFormat) -> anyhow::Result<()> {
    let registry = Registry::standard();
    if format == OutputFormat::Json {
        let listing: Vec<serde_json::Value> = registry
            .list()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "description": c.description,
                    "schema": c.schema,
                })
            })
            .collect();
        return output::print_json(&listing);
    }
    for capability in registry.list() {
        println!("{}  {}", capability.name, capability.description);
    }
    Ok(())
}

pub fn tools_call(store: &MemoryStore, name: &str, args: &str) -> anyhow::Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).with_context(|| "parsing --args as JSON")?;
    let registry = Registry::standard();
    let value = registry.dispatch(store, name, &args)?;
    output::print_json(&value)
}
