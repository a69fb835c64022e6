//! Configuration for alignment runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::AlignflowError;
use crate::pipeline::FailureMode;
use crate::stages::StageDescriptor;

/// File name of the concatenated reads inside the sample directory.
pub const CONCATENATED_READS: &str = "all_guppy.fastq.gz";

/// An executable plus fixed leading arguments.
///
/// Deserializes from either a bare string (`"samtools"`) or an object
/// (`{"program": "/opt/bin/samtools", "args": []}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ToolSpec")]
pub struct ToolCommand {
    /// The executable, resolved through `PATH` when not absolute.
    pub program: PathBuf,
    /// Arguments placed before every invocation's own arguments.
    pub args: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolSpec {
    Name(PathBuf),
    Full {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl From<ToolSpec> for ToolCommand {
    fn from(spec: ToolSpec) -> Self {
        match spec {
            ToolSpec::Name(program) => Self::new(program),
            ToolSpec::Full { program, args } => Self { program, args },
        }
    }
}

impl ToolCommand {
    /// Creates a command with no leading arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds a leading argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Starts a stage descriptor running this tool.
    #[must_use]
    pub fn stage(&self, name: impl Into<String>) -> StageDescriptor {
        StageDescriptor::new(name, &self.program).args(&self.args)
    }
}

/// Read filtering thresholds passed to `NanoFilt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterThresholds {
    /// Minimum average read quality (`-q`).
    #[serde(default = "default_min_quality")]
    pub min_quality: u32,
    /// Bases trimmed from the start of each read (`--headcrop`).
    #[serde(default = "default_headcrop")]
    pub headcrop: u32,
    /// Minimum read length (`-l`).
    #[serde(default = "default_min_length")]
    pub min_length: u32,
}

fn default_min_quality() -> u32 {
    10
}

fn default_headcrop() -> u32 {
    50
}

fn default_min_length() -> u32 {
    1000
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            headcrop: default_headcrop(),
            min_length: default_min_length(),
        }
    }
}

/// Executables used by the alignment chain and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    /// Decompressor.
    #[serde(default = "default_gunzip")]
    pub gunzip: ToolCommand,
    /// Read filter.
    #[serde(default = "default_nanofilt")]
    pub nanofilt: ToolCommand,
    /// Aligner.
    #[serde(default = "default_minimap2")]
    pub minimap2: ToolCommand,
    /// Sorter and indexer.
    #[serde(default = "default_samtools")]
    pub samtools: ToolCommand,
    /// Methylation summariser.
    #[serde(default = "default_modbam2bed")]
    pub modbam2bed: ToolCommand,
    /// Structural variant caller.
    #[serde(default = "default_cutesv")]
    pub cutesv: ToolCommand,
    /// Structural variant caller.
    #[serde(default = "default_sniffles")]
    pub sniffles: ToolCommand,
}

fn default_gunzip() -> ToolCommand {
    ToolCommand::new("gunzip")
}

fn default_nanofilt() -> ToolCommand {
    ToolCommand::new("NanoFilt")
}

fn default_minimap2() -> ToolCommand {
    ToolCommand::new("minimap2")
}

fn default_samtools() -> ToolCommand {
    ToolCommand::new("samtools")
}

fn default_modbam2bed() -> ToolCommand {
    ToolCommand::new("modbam2bed")
}

fn default_cutesv() -> ToolCommand {
    ToolCommand::new("cuteSV")
}

fn default_sniffles() -> ToolCommand {
    ToolCommand::new("sniffles")
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            gunzip: default_gunzip(),
            nanofilt: default_nanofilt(),
            minimap2: default_minimap2(),
            samtools: default_samtools(),
            modbam2bed: default_modbam2bed(),
            cutesv: default_cutesv(),
            sniffles: default_sniffles(),
        }
    }
}

impl ToolPaths {
    /// Loads tool paths from a JSON file. Missing entries keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self, AlignflowError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AlignflowError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            AlignflowError::config(format!("invalid tool paths in {}: {e}", path.display()))
        })
    }
}

/// How the index step is run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// The indexer (`samtools`).
    #[serde(default = "default_samtools")]
    pub samtools: ToolCommand,
    /// Value passed as `--threads=<n>`.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Appended to the canonical file name to locate the index.
    #[serde(default = "default_index_suffix")]
    pub suffix: String,
}

fn default_threads() -> usize {
    24
}

fn default_index_suffix() -> String {
    ".bai".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            samtools: default_samtools(),
            threads: default_threads(),
            suffix: default_index_suffix(),
        }
    }
}

impl IndexConfig {
    /// Sets the indexer.
    #[must_use]
    pub fn with_samtools(mut self, samtools: ToolCommand) -> Self {
        self.samtools = samtools;
        self
    }

    /// Sets the thread count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// The index written for `canonical`.
    #[must_use]
    pub fn index_path(&self, canonical: &Path) -> PathBuf {
        let mut name = canonical.as_os_str().to_os_string();
        name.push(&self.suffix);
        PathBuf::from(name)
    }
}

/// Everything needed to align one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Directory holding the sample's `*.fastq.gz` files.
    pub input_dir: PathBuf,
    /// Sample name; also the name of the output subdirectory.
    pub sample_name: String,
    /// Root under which the sample directory is created.
    pub output_root: PathBuf,
    /// Reference FASTA.
    pub reference: PathBuf,
    /// Optional second directory of reads for the same sample.
    #[serde(default)]
    pub additional_dir: Option<PathBuf>,
    /// Threads for sorting and indexing.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Final BAM. Relative paths land in the sample directory.
    #[serde(default = "default_output_bam")]
    pub output_bam: PathBuf,
    /// Read filter thresholds.
    #[serde(default)]
    pub filter: FilterThresholds,
    /// Executables.
    #[serde(default)]
    pub tools: ToolPaths,
    /// Suffix of the BAM index.
    #[serde(default = "default_index_suffix")]
    pub index_suffix: String,
    /// Kill the chain if it runs longer than this.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    /// What to do with sibling stages once one fails.
    #[serde(default)]
    pub failure_mode: FailureMode,
}

fn default_output_bam() -> PathBuf {
    PathBuf::from("alignment.bam")
}

impl AlignmentConfig {
    /// Creates a configuration with defaults for everything optional.
    #[must_use]
    pub fn new(
        input_dir: impl Into<PathBuf>,
        sample_name: impl Into<String>,
        output_root: impl Into<PathBuf>,
        reference: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            sample_name: sample_name.into(),
            output_root: output_root.into(),
            reference: reference.into(),
            additional_dir: None,
            threads: default_threads(),
            output_bam: default_output_bam(),
            filter: FilterThresholds::default(),
            tools: ToolPaths::default(),
            index_suffix: default_index_suffix(),
            timeout_seconds: None,
            failure_mode: FailureMode::default(),
        }
    }

    /// Sets the secondary read directory.
    #[must_use]
    pub fn with_additional_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.additional_dir = Some(dir.into());
        self
    }

    /// Sets the thread count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the final BAM path.
    #[must_use]
    pub fn with_output_bam(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_bam = path.into();
        self
    }

    /// Sets the filter thresholds.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterThresholds) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the tool paths.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Gets the deadline as a Duration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the seconds are not positive or do
    /// not fit in a `Duration`.
    pub fn timeout(&self) -> Result<Option<Duration>, AlignflowError> {
        let Some(seconds) = self.timeout_seconds else {
            return Ok(None);
        };
        match Duration::try_from_secs_f64(seconds) {
            Ok(deadline) if !deadline.is_zero() => Ok(Some(deadline)),
            _ => Err(AlignflowError::config(format!(
                "timeout must be a positive number of seconds, got {seconds}"
            ))),
        }
    }

    /// `<output_root>/<sample_name>`.
    #[must_use]
    pub fn sample_dir(&self) -> PathBuf {
        self.output_root.join(&self.sample_name)
    }

    /// Where the sample's reads are concatenated.
    #[must_use]
    pub fn concatenated_reads(&self) -> PathBuf {
        self.sample_dir().join(CONCATENATED_READS)
    }

    /// The canonical BAM path.
    #[must_use]
    pub fn output_bam_path(&self) -> PathBuf {
        if self.output_bam.is_absolute() {
            self.output_bam.clone()
        } else {
            self.sample_dir().join(&self.output_bam)
        }
    }

    /// The path `samtools sort` writes before promotion.
    ///
    /// `alignment.bam` becomes `alignment.unsorted.bam`.
    #[must_use]
    pub fn temporary_bam_path(&self) -> PathBuf {
        self.output_bam_path().with_extension("unsorted.bam")
    }

    /// The index settings derived from this configuration.
    #[must_use]
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            samtools: self.tools.samtools.clone(),
            threads: self.threads,
            suffix: self.index_suffix.clone(),
        }
    }

    /// Checks the values that cannot be caught by the type system.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first bad value.
    pub fn validate(&self) -> Result<(), AlignflowError> {
        if self.sample_name.trim().is_empty() {
            return Err(AlignflowError::config("sample name cannot be empty"));
        }
        if self.sample_name.contains(std::path::MAIN_SEPARATOR) || self.sample_name == ".." {
            return Err(AlignflowError::config(format!(
                "sample name '{}' must be a single path component",
                self.sample_name
            )));
        }
        if self.threads == 0 {
            return Err(AlignflowError::config("threads must be at least 1"));
        }
        if self.output_bam.file_name().is_none() {
            return Err(AlignflowError::config(format!(
                "output BAM '{}' has no file name",
                self.output_bam.display()
            )));
        }
        if self.index_suffix.is_empty() {
            return Err(AlignflowError::config("index suffix cannot be empty"));
        }
        self.timeout()?;
        Ok(())
    }
}
