//! The decompress, filter, align, sort chain.

use std::path::Path;

use tracing::info;

use crate::config::{AlignmentConfig, FilterThresholds, ToolPaths};
use crate::core::Artifact;
use crate::errors::{AlignflowError, PipelineValidationError};
use crate::input;
use crate::pipeline::{Finalizer, Pipeline, PipelineBuilder, PipelineRunner};

/// Name of the alignment pipeline in logs and events.
pub const ALIGNMENT_PIPELINE: &str = "alignment";

/// Builds the four-stage alignment chain for already concatenated reads.
///
/// `samtools sort` writes the temporary BAM; the pipeline promotes it to the
/// configured output.
///
/// # Errors
///
/// Returns a validation error if a tool path is empty.
pub fn alignment_pipeline(
    config: &AlignmentConfig,
    reads: &Path,
) -> Result<Pipeline, PipelineValidationError> {
    let temporary = config.temporary_bam_path();
    let tools = &config.tools;

    PipelineBuilder::new(ALIGNMENT_PIPELINE)
        .stage(tools.gunzip.stage("decompress").arg("-c").arg(reads))
        .pipe_to(filter_stage(tools, config.filter))
        .pipe_to(
            tools
                .minimap2
                .stage("align")
                .args(["--MD", "-ax", "map-ont"])
                .arg(&config.reference)
                .arg("-"),
        )
        .pipe_to(
            tools
                .samtools
                .stage("sort")
                .args(["sort", "-O", "BAM"])
                .arg(format!("-@{}", config.threads))
                .arg("-o")
                .arg(&temporary)
                .arg("-")
                .produces(&temporary),
        )
        .promote_to(config.output_bam_path())
        .build()
}

fn filter_stage(tools: &ToolPaths, filter: FilterThresholds) -> crate::stages::StageDescriptor {
    tools
        .nanofilt
        .stage("filter")
        .arg("-q")
        .arg(filter.min_quality.to_string())
        .arg("--headcrop")
        .arg(filter.headcrop.to_string())
        .arg("-l")
        .arg(filter.min_length.to_string())
}

/// Aligns one sample end to end: prepares its reads, runs the chain, then
/// promotes and indexes the BAM.
///
/// # Errors
///
/// Returns the first failure: configuration, input preparation, stage launch
/// or exit, rename, or index.
pub async fn align_sample(
    config: &AlignmentConfig,
    runner: &PipelineRunner,
    finalizer: &Finalizer,
) -> Result<Artifact, AlignflowError> {
    config.validate()?;
    let reads = input::prepare_reads(config)?;
    let pipeline = alignment_pipeline(config, &reads)?;

    info!(
        sample = %config.sample_name,
        reference = %config.reference.display(),
        output = %config.output_bam_path().display(),
        threads = config.threads,
        "Aligning sample"
    );
    runner.run_and_finalize(&pipeline, finalizer).await
}

/// A runner and finalizer configured from `config`.
///
/// # Errors
///
/// Returns a configuration error if `config` does not validate.
pub fn components(
    config: &AlignmentConfig,
) -> Result<(PipelineRunner, Finalizer), AlignflowError> {
    config.validate()?;
    let mut runner = PipelineRunner::new().with_failure_mode(config.failure_mode);
    if let Some(deadline) = config.timeout()? {
        runner = runner.with_deadline(deadline);
    }
    Ok((runner, Finalizer::new(config.index_config())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_alignment_chain_arguments() {
        let config = AlignmentConfig::new("/in", "S1", "/out", "/ref/hg38.fa");
        let reads = config.concatenated_reads();
        let pipeline = alignment_pipeline(&config, &reads).unwrap();

        let commands: Vec<String> = pipeline.stages().iter().map(|s| s.command_line()).collect();
        assert_eq!(
            commands,
            vec![
                "gunzip -c /out/S1/all_guppy.fastq.gz".to_string(),
                "NanoFilt -q 10 --headcrop 50 -l 1000".to_string(),
                "minimap2 --MD -ax map-ont /ref/hg38.fa -".to_string(),
                "samtools sort -O BAM -@24 -o /out/S1/alignment.unsorted.bam -".to_string(),
            ]
        );
        let names: Vec<&str> = pipeline.stages().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["decompress", "filter", "align", "sort"]);
        assert_eq!(pipeline.terminal_output(), Path::new("/out/S1/alignment.unsorted.bam"));
        assert_eq!(pipeline.canonical_output(), Path::new("/out/S1/alignment.bam"));
    }

    #[test]
    fn test_custom_thresholds_and_threads() {
        let config = AlignmentConfig::new("/in", "S1", "/out", "/ref.fa")
            .with_threads(8)
            .with_filter(FilterThresholds { min_quality: 7, headcrop: 0, min_length: 500 });
        let pipeline = alignment_pipeline(&config, Path::new("/reads.fastq.gz")).unwrap();

        assert_eq!(pipeline.stages()[1].command_line(), "NanoFilt -q 7 --headcrop 0 -l 500");
        assert!(pipeline.stages()[3].command_line().contains("-@8"));
    }

    #[test]
    fn test_components_follow_config() {
        let config = AlignmentConfig::new("/in", "S1", "/out", "/ref.fa").with_threads(4);
        let (_runner, finalizer) = components(&config).unwrap();

        assert_eq!(finalizer.index_config().threads, 4);
        assert_eq!(
            finalizer.index_path(Path::new("/out/S1/alignment.bam")),
            PathBuf::from("/out/S1/alignment.bam.bai")
        );
    }

    #[test]
    fn test_components_reject_unrepresentable_timeout() {
        for seconds in [1e30, -1.0] {
            let config = AlignmentConfig::new("/in", "S1", "/out", "/ref.fa").with_timeout(seconds);
            let err = components(&config).unwrap_err();
            assert!(matches!(err, AlignflowError::Config(_)));
            assert_eq!(err.exit_code(), 7);
        }
    }
}
