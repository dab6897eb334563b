mod args;
mod handlers;
mod output;

pub use args::{Cli, Commands, OutputFormat, ToolsCommand};

use engram_runtime::{ForgetRequest, MemoryStore, QueryOptions};
use tracing_subscriber::EnvFilter;

pub fn run(cli: Cli) -> anyhow::Result<()> {
    init_tracing(&cli.log_level);

    let store = MemoryStore::open(cli.data_dir.as_deref())?;
    let format = cli.format;

    match cli.command {
        Commands::Ingest { path, project } => handlers::ingest(&store, path, project, format),

        Commands::Search {
            query,
            project,
            max_tokens,
        } => handlers::search(
            &store,
            &query,
            QueryOptions {
                project,
                max_tokens,
            },
            format,
        ),

        Commands::Recall {
            query,
            project,
            max_tokens,
        } => {
            let result = store.recall(
                &query,
                &QueryOptions {
                    project,
                    max_tokens,
                },
            )?;
            handlers::episode(result, format)
        }

        Commands::Predict {
            context,
            project,
            max_tokens,
        } => {
            let result = store.predict(
                &context,
                &QueryOptions {
                    project,
                    max_tokens,
                },
            )?;
            handlers::episode(result, format)
        }

        Commands::Reconstruct {
            project,
            session_id,
            from,
            to,
            days_back,
            previous_session,
            max_tokens,
            keep_oldest,
        } => handlers::reconstruct(
            &store,
            project,
            session_id,
            from,
            to,
            days_back,
            previous_session,
            max_tokens,
            keep_oldest,
            format,
        ),

        Commands::Projects => handlers::projects(&store, format),

        Commands::Sessions { project, from, to } => {
            handlers::sessions(&store, &project, from.as_deref(), to.as_deref(), format)
        }

        Commands::Forget {
            project,
            before,
            after,
            session_id,
            query,
            threshold,
            dry_run,
        } => handlers::forget(
            &store,
            ForgetRequest {
                project,
                before,
                after,
                session_id,
                query,
                threshold,
                dry_run,
            },
            format,
        ),

        Commands::Stats => handlers::stats(&store, format),

        Commands::Recluster { project } => {
            handlers::recluster(&store, project.as_deref(), format)
        }

        Commands::Bench { project, csv } => {
            handlers::bench(&store, project.as_deref(), csv, format)
        }

        Commands::Tools { command } => match command {
            ToolsCommand::List => handlers::tools_list(format),
            ToolsCommand::Call { name, args } => handlers::tools_call(&store, &name, &args),
        },
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
