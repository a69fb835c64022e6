//! Structural variant calling with cuteSV and Sniffles.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ToolPaths;
use crate::errors::{AlignflowError, PipelineValidationError};
use crate::pipeline::{Pipeline, PipelineBuilder, PipelineRunner};

/// BAM both callers read from the output directory.
pub const VARIANT_INPUT_BAM: &str = "custom_alignment.bam";

/// Threads given to Sniffles.
pub const SNIFFLES_THREADS: u32 = 6;

/// One variant calling run for a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCallingJob {
    /// Sample name written into the cuteSV VCF.
    pub sample_name: String,
    /// Directory holding the input BAM; caller outputs go below it.
    pub output_dir: PathBuf,
    /// Reference FASTA.
    pub reference: PathBuf,
}

/// VCFs produced by a [`VariantCallingJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantOutputs {
    /// cuteSV calls.
    pub cutesv_vcf: PathBuf,
    /// Sniffles calls.
    pub sniffles_vcf: PathBuf,
}

impl VariantCallingJob {
    /// Creates a job.
    #[must_use]
    pub fn new(
        sample_name: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        reference: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sample_name: sample_name.into(),
            output_dir: output_dir.into(),
            reference: reference.into(),
        }
    }

    /// The aligned reads both callers consume.
    #[must_use]
    pub fn input_bam(&self) -> PathBuf {
        self.output_dir.join(VARIANT_INPUT_BAM)
    }

    /// cuteSV's output and work directory.
    #[must_use]
    pub fn cutesv_dir(&self) -> PathBuf {
        self.output_dir.join("cuteSV_output")
    }

    /// Sniffles' output directory.
    #[must_use]
    pub fn sniffles_dir(&self) -> PathBuf {
        self.output_dir.join("sniffles_output")
    }

    /// Where the callers write their VCFs.
    #[must_use]
    pub fn outputs(&self) -> VariantOutputs {
        VariantOutputs {
            cutesv_vcf: self.cutesv_dir().join("cuteSV_output.vcf"),
            sniffles_vcf: self.sniffles_dir().join("output.vcf"),
        }
    }

    /// The cuteSV invocation.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the sample name or cuteSV path is empty.
    pub fn cutesv_pipeline(&self, tools: &ToolPaths) -> Result<Pipeline, PipelineValidationError> {
        if self.sample_name.trim().is_empty() {
            return Err(PipelineValidationError::new("sample name cannot be empty").with_stage("cutesv"));
        }
        let vcf = self.outputs().cutesv_vcf;
        PipelineBuilder::new("cutesv")
            .stage(
                tools
                    .cutesv
                    .stage("cutesv")
                    .args(["--min_size", "30", "--max_size", "100000"])
                    .args(["--diff_ratio_merging_DEL", "0.3", "--max_cluster_bias_DEL", "100"])
                    .arg("--write_old_sigs")
                    .args(["--diff_ratio_merging_INS", "0.3", "--max_cluster_bias_INS", "100"])
                    .arg("-S")
                    .arg(&self.sample_name)
                    .args(["--retain_work_dir", "--report_readid", "--genotype"])
                    .arg(self.input_bam())
                    .arg(&self.reference)
                    .arg(&vcf)
                    .arg(self.cutesv_dir())
                    .produces(&vcf),
            )
            .build()
    }

    /// The Sniffles invocation.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the Sniffles path is empty.
    pub fn sniffles_pipeline(&self, tools: &ToolPaths) -> Result<Pipeline, PipelineValidationError> {
        let vcf = self.outputs().sniffles_vcf;
        PipelineBuilder::new("sniffles")
            .stage(
                tools
                    .sniffles
                    .stage("sniffles")
                    .arg("-i")
                    .arg(self.input_bam())
                    .arg("--reference")
                    .arg(&self.reference)
                    .arg("-v")
                    .arg(&vcf)
                    .arg("-t")
                    .arg(SNIFFLES_THREADS.to_string())
                    .args(["--minsupport", "0", "--mosaic", "--allow-overwrite"])
                    .args(["--mosaic-af-min", "0", "--qc-output-all", "--output-rnames"])
                    .produces(&vcf),
            )
            .build()
    }
}

/// Runs cuteSV, then Sniffles.
///
/// Each caller's output directory is created before it starts.
///
/// # Errors
///
/// Returns the first launch or exit failure; Sniffles is not started if
/// cuteSV failed.
pub async fn run_variant_calling(
    job: &VariantCallingJob,
    tools: &ToolPaths,
    runner: &PipelineRunner,
) -> Result<VariantOutputs, AlignflowError> {
    info!(sample = %job.sample_name, "Running cuteSV");
    std::fs::create_dir_all(job.cutesv_dir())?;
    runner.run(&job.cutesv_pipeline(tools)?).await?;

    info!(sample = %job.sample_name, "Running Sniffles");
    std::fs::create_dir_all(job.sniffles_dir())?;
    runner.run(&job.sniffles_pipeline(tools)?).await?;

    Ok(job.outputs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCommand;
    use crate::events::CollectingEventSink;
    use std::path::Path;
    use std::sync::Arc;

    #[test]
    fn test_cutesv_arguments() {
        let job = VariantCallingJob::new("S1", "/out", "/ref.fa");
        let pipeline = job.cutesv_pipeline(&ToolPaths::default()).unwrap();

        assert_eq!(
            pipeline.stages()[0].command_line(),
            "cuteSV --min_size 30 --max_size 100000 --diff_ratio_merging_DEL 0.3 \
             --max_cluster_bias_DEL 100 --write_old_sigs --diff_ratio_merging_INS 0.3 \
             --max_cluster_bias_INS 100 -S S1 --retain_work_dir --report_readid --genotype \
             /out/custom_alignment.bam /ref.fa /out/cuteSV_output/cuteSV_output.vcf /out/cuteSV_output"
        );
    }

    #[test]
    fn test_sniffles_arguments() {
        let job = VariantCallingJob::new("S1", "/out", "/ref.fa");
        let pipeline = job.sniffles_pipeline(&ToolPaths::default()).unwrap();

        assert_eq!(
            pipeline.stages()[0].command_line(),
            "sniffles -i /out/custom_alignment.bam --reference /ref.fa \
             -v /out/sniffles_output/output.vcf -t 6 --minsupport 0 --mosaic --allow-overwrite \
             --mosaic-af-min 0 --qc-output-all --output-rnames"
        );
        assert_eq!(
            pipeline.terminal_output(),
            Path::new("/out/sniffles_output/output.vcf")
        );
    }

    #[tokio::test]
    async fn test_sniffles_skipped_after_cutesv_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let fail = dir.path().join("fail.sh");
        std::fs::write(&fail, "exit 2\n").unwrap();

        let tools = ToolPaths {
            cutesv: ToolCommand::new("sh").with_arg(fail.display().to_string()),
            sniffles: ToolCommand::new("sh").with_arg(fail.display().to_string()),
            ..ToolPaths::default()
        };
        let job = VariantCallingJob::new("S1", dir.path(), "/ref.fa");
        let runner = PipelineRunner::new().with_sink(sink.clone());

        let err = run_variant_calling(&job, &tools, &runner).await.unwrap_err();

        assert_eq!(err.stage(), Some("cutesv"));
        assert_eq!(sink.launched_stages(), vec!["cutesv"]);
        assert!(job.cutesv_dir().is_dir());
        assert!(!job.sniffles_dir().exists());
    }
}
