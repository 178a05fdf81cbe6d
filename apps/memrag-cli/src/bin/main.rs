use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use memrag_core::config::{expand_path, resolve_with_base, Config};
use memrag_core::traits::VectorIndex;
use memrag_embed::{build_service, EmbedOptions};
use memrag_engine::{RagEngine, DEFAULT_THRESHOLD, DEFAULT_TOP_K};
use memrag_vector::LanceVectorIndex;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} <command> [args]");
    eprintln!("Commands:");
    eprintln!("  sync <tenant>                         rebuild one tenant from its export file");
    eprintln!("  sync-all [tenant...]                  rebuild listed tenants, or every export file");
    eprintln!("  search <tenant> <query> [--top-k N] [--threshold X]");
    eprintln!("  stats <tenant>                        chunk count and index health");
    eprintln!("  delete <tenant> <chunk_id>            remove one chunk");
    eprintln!("  drop <tenant>                         drop the tenant's whole collection");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }

    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {e}"); e })?;
    // Relative data paths resolve against the invocation directory.
    let base = env::current_dir()?;
    let export_dir =
        resolve_with_base(&base, config.get_or("data.export_dir", "data/exports".to_string()));
    let lancedb_dir =
        resolve_with_base(&base, config.get_or("data.lancedb_dir", "data/lancedb".to_string()));

    let opts = EmbedOptions {
        model_dir: config.get::<String>("embedding.model_dir").ok().map(expand_path),
        fallback_model_dir: config
            .get::<String>("embedding.fallback_model_dir")
            .ok()
            .map(expand_path),
        cache_capacity: config.get::<usize>("embedding.cache_capacity").ok(),
        use_fake: config.get_or("embedding.use_fake", false),
    };
    let embeddings = Arc::new(build_service(&opts)?);
    let dim = embeddings.dimension()?;
    println!("🧠 Embedding backend: {} (dim {})", embeddings.backend_id(), dim);

    let op_timeout = Duration::from_secs(config.get_or("engine.op_timeout_secs", 30));
    let store = Arc::new(
        LanceVectorIndex::open(
            lancedb_dir.to_str().ok_or_else(|| anyhow::anyhow!("non-utf8 lancedb path"))?,
            dim,
        )
        .await?
        .with_op_timeout(op_timeout),
    );
    let engine = RagEngine::new(store.clone(), embeddings, export_dir.clone())
        .with_query_cache_capacity(config.get_or("engine.query_cache_capacity", 256));

    match args[1].as_str() {
        "sync" => {
            let tenant = args.get(2).unwrap_or_else(|| usage(&args[0]));
            let upserted = engine.update_index(tenant).await?;
            println!("✅ {tenant}: {upserted} chunks upserted");
        }
        "sync-all" => {
            let tenants: Vec<String> = if args.len() > 2 {
                args[2..].to_vec()
            } else {
                tenants_from_exports(&export_dir)?
            };
            if tenants.is_empty() {
                println!("No export files found in {}", export_dir.display());
                return Ok(());
            }
            let pb = ProgressBar::new(tenants.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tenants {msg}")
                    .map_err(|e| anyhow::anyhow!("progress template: {e}"))?
                    .progress_chars("#>-"),
            );
            let mut failed = 0usize;
            for tenant in &tenants {
                pb.set_message(tenant.clone());
                let results = engine.batch_update_indices(std::slice::from_ref(tenant)).await;
                if results.get(tenant) != Some(&true) {
                    failed += 1;
                }
                pb.inc(1);
            }
            pb.finish_with_message("done");
            println!("✅ Rebuilt {} tenants, {} failed", tenants.len() - failed, failed);
            if failed > 0 {
                std::process::exit(1);
            }
        }
        "search" => {
            if args.len() < 4 {
                usage(&args[0]);
            }
            let tenant = &args[2];
            let query = &args[3];
            let mut top_k = config.get_or("engine.top_k", DEFAULT_TOP_K);
            let mut threshold = config.get_or("engine.threshold", DEFAULT_THRESHOLD);
            let mut i = 4;
            while i < args.len() {
                match args[i].as_str() {
                    "--top-k" => {
                        top_k = parse_flag(&args, i, "--top-k");
                        i += 1;
                    }
                    "--threshold" => {
                        threshold = parse_flag(&args, i, "--threshold");
                        i += 1;
                    }
                    other => {
                        eprintln!("Unknown flag: {other}");
                        std::process::exit(1);
                    }
                }
                i += 1;
            }
            let results = engine.search(query, tenant, top_k, threshold).await;
            println!("\n🔍 Found {} results for: \"{query}\"", results.len());
            for r in &results {
                println!("\n  {}. similarity={:.4}  id={}", r.rank, r.similarity, r.id);
                println!("     📝 {}", r.text.replace('\n', "\n        "));
            }
        }
        "stats" => {
            let tenant = args.get(2).unwrap_or_else(|| usage(&args[0]));
            let stats = engine.index_manager().stats(tenant).await;
            println!("📊 {tenant}: {} chunks, status {:?}", stats.count, stats.status);
        }
        "delete" => {
            if args.len() < 4 {
                usage(&args[0]);
            }
            engine.index_manager().delete_chunk(&args[2], &args[3]).await?;
            println!("✅ Deleted {} from {}", args[3], args[2]);
        }
        "drop" => {
            let tenant = args.get(2).unwrap_or_else(|| usage(&args[0]));
            store.drop_collection(tenant).await?;
            println!("✅ Dropped collection for {tenant}");
        }
        _ => usage(&args[0]),
    }
    Ok(())
}

fn parse_flag<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> T {
    match args.get(i + 1).map(|v| v.parse::<T>()) {
        Some(Ok(v)) => v,
        _ => {
            eprintln!("Error: {name} requires a value");
            std::process::exit(1);
        }
    }
}

/// Every `<tenant>.jsonl` under the export directory.
fn tenants_from_exports(export_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut tenants = Vec::new();
    if !export_dir.exists() {
        return Ok(tenants);
    }
    for entry in fs::read_dir(export_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tenants.push(stem.to_string());
            }
        }
    }
    tenants.sort();
    Ok(tenants)
}
