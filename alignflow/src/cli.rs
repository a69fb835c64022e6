//! Command line definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use alignflow::config::{AlignmentConfig, FilterThresholds, IndexConfig, ToolCommand, ToolPaths};
use alignflow::pipeline::FailureMode;

#[derive(Debug, Parser)]
#[command(name = "alignflow")]
#[command(about = "Align nanopore reads through a streaming tool chain", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Write logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Concatenate reads, align, sort, then promote and index the BAM
    Align(AlignArgs),

    /// Index an existing BAM again after an index failure
    Index(IndexArgs),

    /// Sort a BAM and summarise CpG methylation with modbam2bed
    Methylation(MethylationArgs),

    /// Call structural variants with cuteSV and Sniffles
    Variants(VariantsArgs),
}

#[derive(Debug, Args)]
pub struct AlignArgs {
    /// Directory containing the sample's *.fastq.gz files
    #[arg(long, alias = "input_dir")]
    pub input_dir: PathBuf,

    /// Sample name; outputs go to <output-root>/<sample-name>/
    #[arg(long, alias = "sample_name")]
    pub sample_name: String,

    /// Root directory for per-sample outputs
    #[arg(long, alias = "output_root")]
    pub output_root: PathBuf,

    /// Reference FASTA
    #[arg(long, alias = "reference_fasta")]
    pub reference: PathBuf,

    /// Second directory of *.fastq.gz files for the same sample
    #[arg(long, alias = "additional_dir")]
    pub additional_dir: Option<PathBuf>,

    /// Threads for sorting and indexing
    #[arg(long, default_value_t = 24)]
    pub threads: usize,

    /// Final BAM; relative paths land in the sample directory
    #[arg(long, alias = "output_bam", default_value = "alignment.bam")]
    pub output_bam: PathBuf,

    /// Minimum average read quality
    #[arg(long, default_value_t = 10)]
    pub min_quality: u32,

    /// Bases trimmed from the start of each read
    #[arg(long, default_value_t = 50)]
    pub headcrop: u32,

    /// Minimum read length
    #[arg(long, default_value_t = 1000)]
    pub min_length: u32,

    /// Kill the chain if it runs longer than this many seconds
    #[arg(long)]
    pub timeout_secs: Option<f64>,

    /// Kill the remaining stages as soon as one fails
    #[arg(long)]
    pub fail_fast: bool,

    /// JSON file with tool paths
    #[arg(long)]
    pub tools_config: Option<PathBuf>,
}

impl AlignArgs {
    pub fn into_config(self) -> Result<AlignmentConfig> {
        let tools = load_tools(self.tools_config.as_deref())?;
        let mut config = AlignmentConfig::new(
            self.input_dir,
            self.sample_name,
            self.output_root,
            self.reference,
        )
        .with_threads(self.threads)
        .with_output_bam(self.output_bam)
        .with_filter(FilterThresholds {
            min_quality: self.min_quality,
            headcrop: self.headcrop,
            min_length: self.min_length,
        })
        .with_tools(tools);

        if let Some(dir) = self.additional_dir {
            config = config.with_additional_dir(dir);
        }
        if let Some(seconds) = self.timeout_secs {
            config = config.with_timeout(seconds);
        }
        if self.fail_fast {
            config = config.with_failure_mode(FailureMode::FailFast);
        }
        Ok(config)
    }
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// The canonical BAM to index
    pub bam: PathBuf,

    /// Threads passed to samtools index
    #[arg(long, default_value_t = 24)]
    pub threads: usize,

    /// samtools executable
    #[arg(long, default_value = "samtools")]
    pub samtools: PathBuf,
}

impl IndexArgs {
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig::default()
            .with_samtools(ToolCommand::new(&self.samtools))
            .with_threads(self.threads)
    }
}

#[derive(Debug, Args)]
pub struct MethylationArgs {
    /// Sample name; also the output directory
    #[arg(long, alias = "sample_name")]
    pub sample_name: String,

    /// Reference genome
    #[arg(long, alias = "reference_genome")]
    pub reference: PathBuf,

    /// Unsorted BAM with modified-base tags
    #[arg(long, alias = "bam_file")]
    pub bam: PathBuf,

    /// Region name for modbam2bed (e.g. ncats_AAV_insert)
    #[arg(long)]
    pub region: String,

    /// JSON file with tool paths
    #[arg(long)]
    pub tools_config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct VariantsArgs {
    /// Sample name
    pub sample_name: String,

    /// Directory holding custom_alignment.bam
    pub output_dir: PathBuf,

    /// Reference genome
    pub reference: PathBuf,

    /// JSON file with tool paths
    #[arg(long)]
    pub tools_config: Option<PathBuf>,
}

pub fn load_tools(path: Option<&std::path::Path>) -> Result<ToolPaths> {
    match path {
        Some(path) => ToolPaths::from_json_file(path)
            .with_context(|| format!("loading tools config {}", path.display())),
        None => Ok(ToolPaths::default()),
    }
}
