mod cli;

use mediaforge::{config, pipeline::MediaPipeline, publisher::JobResult, server};
use mediaforge_av::{FfmpegEngine, ToolRegistry};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over file and environment
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting mediaforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let tools = ToolRegistry::discover(&config.tools);
    for missing in tools.check_all().iter().filter(|t| !t.available) {
        tracing::warn!("{} not found; jobs will fail until it is installed", missing.name);
    }

    let engine = FfmpegEngine::new(tools.clone(), config.executor.engine_settings());
    let pipeline = Arc::new(MediaPipeline::new(&config, Arc::new(engine)));

    server::start_server(config, pipeline, tools).await
}

struct RunRequest {
    input: PathBuf,
    operation: String,
    params: BTreeMap<String, String>,
    output: Option<PathBuf>,
}

async fn run_file(request: RunRequest, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !request.input.is_file() {
        anyhow::bail!("Input file does not exist: {:?}", request.input);
    }
    let file_name = request
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Input path has no usable file name: {:?}", request.input))?;

    let tools = ToolRegistry::discover(&config.tools);
    let engine = FfmpegEngine::new(tools, config.executor.engine_settings());
    let pipeline = MediaPipeline::new(&config, Arc::new(engine));
    pipeline.start().await?;

    let prepared = pipeline.prepare(file_name, &request.operation, &request.params)?;
    let file = tokio::fs::File::open(&request.input)
        .await
        .with_context(|| format!("Failed to open {:?}", request.input))?;
    let id = pipeline
        .submit(prepared, tokio_util::io::ReaderStream::new(file))
        .await?;
    println!("Submitted job {} ({})", id, request.operation);

    let budget = config.executor.job_timeout()
        + config.executor.probe_timeout()
        + config.executor.grace_period() * 2;
    let job = pipeline.wait(id, budget).await?;
    tracing::debug!("Job finished: {:?}", job);

    let outcome = match pipeline.fetch(id)? {
        JobResult::Ready(result) => {
            match &request.output {
                Some(dest) => {
                    tokio::fs::copy(&result.path, dest)
                        .await
                        .with_context(|| format!("Failed to copy result to {:?}", dest))?;
                    pipeline.release(id).await?;
                    println!("Output: {} ({} bytes)", dest.display(), result.size);
                }
                None => println!("Output: {} ({} bytes)", result.path.display(), result.size),
            }
            Ok(())
        }
        JobResult::Failed(error) => {
            pipeline.release(id).await?;
            Err(anyhow::anyhow!("Job {} failed ({}): {}", id, error.kind, error.message))
        }
        JobResult::Pending(status) => Err(anyhow::anyhow!("Job {} is still {}", id, status)),
    };

    pipeline.shutdown();
    outcome
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediaforge=trace,mediaforge_av=trace,mediaforge_common=debug,tower_http=debug".to_string()
        } else {
            "mediaforge=info,mediaforge_av=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Run {
            input,
            operation,
            format,
            start,
            end,
            text,
            font,
            params,
            output,
        } => {
            let mut all: BTreeMap<String, String> = params.into_iter().collect();
            let named = [
                ("format", format),
                ("start", start),
                ("end", end),
                ("text", text),
                ("font", font),
            ];
            for (key, value) in named {
                if let Some(value) = value {
                    all.insert(key.to_string(), value);
                }
            }

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_file(
                RunRequest {
                    input,
                    operation,
                    params: all,
                    output,
                },
                cli.config.as_deref(),
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediaforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
        Ok(())
    } else {
        anyhow::bail!("Some tools are missing; install ffmpeg (which ships ffprobe)")
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, checking defaults and environment");
            config::load_config_or_default(None)?
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Storage: uploads {:?}, outputs {:?}, max {} MB, retention {}s",
        config.storage.upload_dir,
        config.storage.output_dir,
        config.storage.max_upload_mb,
        config.storage.retention_secs
    );
    println!(
        "  Executor: {} worker(s), queue {}, timeout {}s",
        config.executor.workers, config.executor.queue_capacity, config.executor.job_timeout_secs
    );
    println!("  Fonts: {} (default {})", config.fonts.files.len(), config.fonts.default);

    Ok(())
}
