//! Stage factories for the external bioinformatics tools.
//!
//! Every invocation is a structured argument list run through the same
//! orchestrator and supervisor as the alignment chain.

mod alignment;
mod methylation;
mod variants;

pub use alignment::{align_sample, alignment_pipeline, components, ALIGNMENT_PIPELINE};
pub use methylation::{run_methylation, MethylationJob, MODBAM2BED_THREADS};
pub use variants::{
    run_variant_calling, VariantCallingJob, VariantOutputs, SNIFFLES_THREADS, VARIANT_INPUT_BAM,
};
