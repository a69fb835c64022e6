//! Alignflow command line.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use alignflow::cancellation::CancellationToken;
use alignflow::config::IndexConfig;
use alignflow::errors::AlignflowError;
use alignflow::events::{EventSink, LoggingEventSink};
use alignflow::observability::init_logging;
use alignflow::pipeline::{Finalizer, PipelineRunner};
use alignflow::tools::{self, MethylationJob, VariantCallingJob};

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let token = Arc::new(CancellationToken::new());
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping running stages");
                token.cancel("interrupted");
            }
        });
    }

    match run(cli.command, token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<AlignflowError>()
                .map_or(1, AlignflowError::exit_code);
            eprintln!("error: {err:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(command: Command, token: Arc<CancellationToken>) -> Result<()> {
    let sink: Arc<dyn EventSink> = Arc::new(LoggingEventSink::debug());

    match command {
        Command::Align(args) => {
            let config = args.into_config()?;
            config.validate()?;
            let (runner, finalizer) = tools::components(&config)?;
            let runner = runner.with_sink(sink.clone()).with_cancellation(token.clone());
            let finalizer = finalizer.with_sink(sink).with_cancellation(token);

            let artifact = tools::align_sample(&config, &runner, &finalizer).await?;
            info!(
                bam = %artifact.canonical_path().display(),
                index = ?artifact.index_path(),
                "Alignment complete"
            );
        }

        Command::Index(args) => {
            let finalizer = Finalizer::new(args.index_config())
                .with_sink(sink)
                .with_cancellation(token);
            let artifact = finalizer.retry_index(&args.bam).await?;
            info!(index = ?artifact.index_path(), "Index written");
        }

        Command::Methylation(args) => {
            let tool_paths = cli::load_tools(args.tools_config.as_deref())?;
            let job = MethylationJob::new(&args.sample_name, args.reference, args.bam, args.region);
            let runner = PipelineRunner::new()
                .with_sink(sink.clone())
                .with_cancellation(token.clone());
            let finalizer =
                Finalizer::new(IndexConfig::default().with_samtools(tool_paths.samtools.clone()))
                    .with_sink(sink)
                    .with_cancellation(token);

            let bed = tools::run_methylation(&job, &tool_paths, &runner, &finalizer).await?;
            info!(output = %bed.display(), "Methylation complete");
        }

        Command::Variants(args) => {
            let tool_paths = cli::load_tools(args.tools_config.as_deref())?;
            let job = VariantCallingJob::new(args.sample_name, args.output_dir, args.reference);
            let runner = PipelineRunner::new()
                .with_sink(sink)
                .with_cancellation(token);

            let outputs = tools::run_variant_calling(&job, &tool_paths, &runner).await?;
            info!(
                cutesv = %outputs.cutesv_vcf.display(),
                sniffles = %outputs.sniffles_vcf.display(),
                "Variant calling complete"
            );
        }
    }

    Ok(())
}
