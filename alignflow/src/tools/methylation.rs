//! CpG methylation summary with `modbam2bed`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ToolPaths;
use crate::core::Artifact;
use crate::errors::{AlignflowError, PipelineValidationError};
use crate::pipeline::{Finalizer, Pipeline, PipelineBuilder, PipelineRunner};

/// Threads given to `modbam2bed`.
pub const MODBAM2BED_THREADS: u32 = 4;

/// One methylation analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethylationJob {
    /// Directory for the sorted BAM and the `methylation/` subdirectory.
    pub sample_dir: PathBuf,
    /// Reference FASTA.
    pub reference: PathBuf,
    /// Unsorted input BAM with modified-base tags.
    pub bam: PathBuf,
    /// Region name passed to `-r`.
    pub region: String,
}

impl MethylationJob {
    /// Creates a job.
    #[must_use]
    pub fn new(
        sample_dir: impl Into<PathBuf>,
        reference: impl Into<PathBuf>,
        bam: impl Into<PathBuf>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            sample_dir: sample_dir.into(),
            reference: reference.into(),
            bam: bam.into(),
            region: region.into(),
        }
    }

    /// `<sample_dir>/methylation`.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.sample_dir.join("methylation")
    }

    /// `<sample_dir>/sorted.bam`.
    #[must_use]
    pub fn sorted_bam(&self) -> PathBuf {
        self.sample_dir.join("sorted.bam")
    }

    /// `<sample_dir>/methylation/output.cpg.bed`.
    #[must_use]
    pub fn bed_output(&self) -> PathBuf {
        self.output_dir().join("output.cpg.bed")
    }

    /// `samtools sort <bam> -o <sorted>`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the samtools path is empty.
    pub fn sort_pipeline(&self, tools: &ToolPaths) -> Result<Pipeline, PipelineValidationError> {
        let sorted = self.sorted_bam();
        PipelineBuilder::new("methylation-sort")
            .stage(
                tools
                    .samtools
                    .stage("sort")
                    .arg("sort")
                    .arg(&self.bam)
                    .arg("-o")
                    .arg(&sorted)
                    .produces(&sorted),
            )
            .build()
    }

    /// `modbam2bed ... <ref> <sorted>` with stdout redirected into the BED file.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the region or modbam2bed path is empty.
    pub fn modbam2bed_pipeline(&self, tools: &ToolPaths) -> Result<Pipeline, PipelineValidationError> {
        if self.region.trim().is_empty() {
            return Err(PipelineValidationError::new("methylation region cannot be empty")
                .with_stage("modbam2bed"));
        }
        PipelineBuilder::new("methylation")
            .stage(
                tools
                    .modbam2bed
                    .stage("modbam2bed")
                    .args(["--aggregate", "-e", "-m", "5mC", "--cpg", "-t"])
                    .arg(MODBAM2BED_THREADS.to_string())
                    .arg("-r")
                    .arg(&self.region)
                    .arg(&self.reference)
                    .arg(self.sorted_bam())
                    .stdout_to(self.bed_output()),
            )
            .build()
    }
}

/// Sorts the BAM, indexes it unless an index already exists, and writes the
/// CpG BED file. Returns the BED path.
///
/// # Errors
///
/// Returns the first launch, exit or index failure.
pub async fn run_methylation(
    job: &MethylationJob,
    tools: &ToolPaths,
    runner: &PipelineRunner,
    finalizer: &Finalizer,
) -> Result<PathBuf, AlignflowError> {
    std::fs::create_dir_all(job.output_dir())?;

    runner.run(&job.sort_pipeline(tools)?).await?;

    let sorted = job.sorted_bam();
    if index_missing(finalizer, &sorted) {
        finalizer.index(Artifact::promoted(&sorted)).await?;
    } else {
        info!(bam = %sorted.display(), "Index already present");
    }

    runner.run(&job.modbam2bed_pipeline(tools)?).await?;
    let bed = job.bed_output();
    info!(output = %bed.display(), "Methylation analysis completed");
    Ok(bed)
}

fn index_missing(finalizer: &Finalizer, bam: &Path) -> bool {
    !finalizer.index_path(bam).exists()
}
