//! End-to-end tests of the alignment chain with shell stand-ins for the tools.

#[cfg(test)]
mod tests {
    use crate::config::{AlignmentConfig, ToolCommand, ToolPaths};
    use crate::errors::{AlignflowError, FinalizeError};
    use crate::events::CollectingEventSink;
    use crate::pipeline::FailureMode;
    use crate::tools::{align_sample, components};
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    const GUNZIP: &str = r#"[ "$1" = -c ] || exit 64
exec cat "$2"
"#;

    const NANOFILT: &str = r#"[ "$1" = -q ] && [ "$2" = 10 ] && [ "$3" = --headcrop ] && [ "$4" = 50 ] && [ "$5" = -l ] && [ "$6" = 1000 ] || exit 64
exec cat
"#;

    const MINIMAP2: &str = r#"[ -f "$4" ] || { echo "minimap2: cannot open $4" >&2; exit 1; }
exec cat
"#;

    const SAMTOOLS: &str = r#"case "$1" in
  sort)
    [ "$4" = "-@24" ] || exit 64
    sort > "$6"
    ;;
  index)
    [ -f "$3" ] || exit 1
    [ ! -e "${3%.bam}.unsorted.bam" ] || exit 3
    printf 'index of %s\n' "$3" > "$3.bai"
    ;;
  *) exit 64 ;;
esac
"#;

    struct Sandbox {
        dir: tempfile::TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let reads = dir.path().join("reads");
            std::fs::create_dir(&reads).unwrap();
            std::fs::write(reads.join("run1.fastq.gz"), "read-c\nread-a\n").unwrap();
            std::fs::write(reads.join("run2.fastq.gz"), "read-b\n").unwrap();
            std::fs::write(dir.path().join("ref.fa"), ">chr1\nACGT\n").unwrap();
            Self { dir }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn tool(&self, name: &str, script: &str) -> ToolCommand {
            let path = self.path().join(format!("{name}.sh"));
            std::fs::write(&path, script).unwrap();
            ToolCommand::new("sh").with_arg(path.display().to_string())
        }

        fn tools(&self) -> ToolPaths {
            ToolPaths {
                gunzip: self.tool("gunzip", GUNZIP),
                nanofilt: self.tool("nanofilt", NANOFILT),
                minimap2: self.tool("minimap2", MINIMAP2),
                samtools: self.tool("samtools", SAMTOOLS),
                ..ToolPaths::default()
            }
        }

        fn config(&self) -> AlignmentConfig {
            AlignmentConfig::new(
                self.path().join("reads"),
                "S1",
                self.path().join("results"),
                self.path().join("ref.fa"),
            )
            .with_tools(self.tools())
        }

        fn canonical(&self) -> PathBuf {
            self.path().join("results/S1/alignment.bam")
        }

        fn temporary(&self) -> PathBuf {
            self.path().join("results/S1/alignment.unsorted.bam")
        }
    }

    async fn align(
        config: &AlignmentConfig,
        sink: &Arc<CollectingEventSink>,
    ) -> Result<crate::core::Artifact, AlignflowError> {
        let (runner, finalizer) = components(config)?;
        let runner = runner.with_sink(sink.clone());
        let finalizer = finalizer.with_sink(sink.clone());
        align_sample(config, &runner, &finalizer).await
    }

    #[tokio::test]
    async fn test_full_chain_produces_sorted_indexed_artifact() {
        let sandbox = Sandbox::new();
        let sink = Arc::new(CollectingEventSink::new());

        let artifact = align(&sandbox.config(), &sink).await.unwrap();

        let canonical = sandbox.canonical();
        let index = sandbox.path().join("results/S1/alignment.bam.bai");
        assert_eq!(artifact.canonical_path(), canonical.as_path());
        assert!(artifact.is_promoted());
        assert!(artifact.is_indexed());
        assert_eq!(artifact.index_path(), Some(index.as_path()));

        assert_eq!(
            std::fs::read_to_string(&canonical).unwrap(),
            "read-a\nread-b\nread-c\n"
        );
        assert!(index.exists());
        assert!(!sandbox.temporary().exists());
        assert!(sandbox.path().join("results/S1/all_guppy.fastq.gz").exists());

        assert_eq!(
            sink.launched_stages(),
            vec!["decompress", "filter", "align", "sort", "index"]
        );
        assert!(sink.events_of_type("stage.exited").iter().all(|e| e.data["success"] == true));
    }

    #[tokio::test]
    async fn test_index_is_never_older_than_rename() {
        let sandbox = Sandbox::new();
        let sink = Arc::new(CollectingEventSink::new());

        align(&sandbox.config(), &sink).await.unwrap();

        let renamed = std::fs::metadata(sandbox.canonical()).unwrap().modified().unwrap();
        let indexed = std::fs::metadata(sandbox.path().join("results/S1/alignment.bam.bai"))
            .unwrap()
            .modified()
            .unwrap();
        assert!(indexed >= renamed);

        let types = sink.event_types();
        let promoted = types.iter().position(|t| t == "artifact.promoted").unwrap();
        let indexed = types.iter().position(|t| t == "artifact.indexed").unwrap();
        assert!(promoted < indexed);
    }

    #[tokio::test]
    async fn test_missing_reference_names_align_stage() {
        let sandbox = Sandbox::new();
        let sink = Arc::new(CollectingEventSink::new());
        let mut config = sandbox.config();
        config.reference = sandbox.path().join("absent.fa");

        let err = align(&config, &sink).await.unwrap_err();

        assert_eq!(err.stage(), Some("align"));
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("exit code 1"));

        let launched = sink.launched_stages();
        assert_eq!(&launched[..3], &["decompress", "filter", "align"]);
        assert!(!sandbox.canonical().exists());
        assert!(!sandbox.path().join("results/S1/alignment.bam.bai").exists());
        assert!(sink.events_of_type("artifact.").is_empty());
    }

    #[tokio::test]
    async fn test_crashed_decompressor_fails_run_despite_clean_downstream() {
        let sandbox = Sandbox::new();
        let sink = Arc::new(CollectingEventSink::new());
        let mut config = sandbox.config();
        config.tools.gunzip = sandbox.tool("gunzip-corrupt", "cat \"$2\"\nexit 1\n");

        let err = align(&config, &sink).await.unwrap_err();

        assert_eq!(err.stage(), Some("decompress"));
        assert!(!sandbox.canonical().exists());
        // Intermediate output stays in place for inspection.
        assert!(sandbox.temporary().exists());
    }

    #[tokio::test]
    async fn test_index_failure_leaves_promoted_artifact() {
        let sandbox = Sandbox::new();
        let sink = Arc::new(CollectingEventSink::new());
        let mut config = sandbox.config();
        config.tools.samtools = sandbox.tool(
            "samtools-noindex",
            "case \"$1\" in sort) sort > \"$6\" ;; *) exit 1 ;; esac\n",
        );

        let err = align(&config, &sink).await.unwrap_err();

        match err {
            AlignflowError::Finalize(FinalizeError::Index { artifact, .. }) => {
                assert!(artifact.is_promoted());
                assert!(!artifact.is_indexed());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            std::fs::read_to_string(sandbox.canonical()).unwrap(),
            "read-a\nread-b\nread-c\n"
        );
        assert_eq!(sink.events_of_type("artifact.index_failed").len(), 1);

        let (_, finalizer) = components(&sandbox.config()).unwrap();
        let retried = finalizer.retry_index(&sandbox.canonical()).await.unwrap();
        assert!(retried.is_indexed());
        assert_eq!(
            std::fs::read_to_string(sandbox.canonical()).unwrap(),
            "read-a\nread-b\nread-c\n"
        );
    }

    #[tokio::test]
    async fn test_hung_aligner_hits_deadline() {
        let sandbox = Sandbox::new();
        let sink = Arc::new(CollectingEventSink::new());
        let mut config = sandbox
            .config()
            .with_timeout(0.5)
            .with_failure_mode(FailureMode::FailFast);
        config.tools.minimap2 = sandbox.tool("minimap2-hung", "exec sleep 30\n");

        let started = std::time::Instant::now();
        let err = align(&config, &sink).await.unwrap_err();

        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        assert!(matches!(err, AlignflowError::Timeout { ref stages, .. } if stages.contains(&"align".to_string())));
        assert_eq!(err.exit_code(), 6);
        assert!(!sandbox.canonical().exists());
    }
}
