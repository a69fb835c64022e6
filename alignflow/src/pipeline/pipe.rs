//! OS pipes between adjacent stages.
//!
//! The kernel buffer behind each pipe is the only flow control in a chain: a
//! producer that outruns its consumer blocks in `write(2)` once the buffer is
//! full, so a stalled stage throttles everything upstream of it without any
//! bytes being dropped or spooled to disk.

use std::io::{PipeReader, PipeWriter};
use std::process::Stdio;

use crate::errors::StageLaunchError;
use crate::stages::StageDescriptor;

/// Default capacity of a Linux pipe buffer; a producer stalls once this many
/// bytes sit unread.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Both ends of one pipe, waiting to be handed to their processes.
///
/// Each end is moved out exactly once. Moving an end into a [`Stdio`] makes the
/// spawning `Command` its owner; dropping the `Command` right after spawn is
/// what closes the orchestrator's copy.
#[derive(Debug)]
pub struct PipeLink {
    producer: String,
    consumer: String,
    write_end: Option<PipeWriter>,
    read_end: Option<PipeReader>,
}

impl PipeLink {
    /// Name of the stage writing into the pipe.
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Name of the stage reading from the pipe.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Takes the write end for the producer's stdout.
    pub fn take_write_end(&mut self) -> Option<Stdio> {
        self.write_end.take().map(Stdio::from)
    }

    /// Takes the read end for the consumer's stdin.
    pub fn take_read_end(&mut self) -> Option<Stdio> {
        self.read_end.take().map(Stdio::from)
    }
}

/// Allocates the pipe connecting `producer`'s stdout to `consumer`'s stdin.
///
/// Both ends are close-on-exec, so only the process each end is explicitly
/// handed to ever holds it.
///
/// # Errors
///
/// Returns a launch error attributed to the producer if the OS refuses to
/// create the pipe (e.g. the descriptor table is full).
pub fn connect(
    producer: &StageDescriptor,
    consumer: &StageDescriptor,
) -> Result<PipeLink, StageLaunchError> {
    let (read_end, write_end) = std::io::pipe().map_err(|e| {
        StageLaunchError::new(producer.name(), producer.program().display().to_string(), e)
    })?;

    tracing::trace!(
        producer = producer.name(),
        consumer = consumer.name(),
        "Pipe allocated"
    );

    Ok(PipeLink {
        producer: producer.name().to_string(),
        consumer: consumer.name().to_string(),
        write_end: Some(write_end),
        read_end: Some(read_end),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn link() -> PipeLink {
        connect(
            &StageDescriptor::new("producer", "yes"),
            &StageDescriptor::new("consumer", "cat"),
        )
        .unwrap()
    }

    fn raw_ends(link: PipeLink) -> (PipeWriter, PipeReader) {
        (link.write_end.unwrap(), link.read_end.unwrap())
    }

    #[test]
    fn test_connect_names_both_sides() {
        let link = link();
        assert_eq!(link.producer(), "producer");
        assert_eq!(link.consumer(), "consumer");
    }

    #[test]
    fn test_ends_taken_once() {
        let mut link = link();
        assert!(link.take_write_end().is_some());
        assert!(link.take_write_end().is_none());
        assert!(link.take_read_end().is_some());
        assert!(link.take_read_end().is_none());
    }

    #[test]
    fn test_bytes_arrive_in_order_and_eof_follows_writer_close() {
        let (mut writer, mut reader) = raw_ends(link());

        writer.write_all(b"first\nsecond\n").unwrap();
        drop(writer);

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "first\nsecond\n");
    }

    #[test]
    fn test_producer_blocks_when_buffer_full() {
        const CHUNK: usize = 4096;
        const TOTAL: usize = 4 * 1024 * 1024;

        let (mut writer, mut reader) = raw_ends(link());
        let written = Arc::new(AtomicUsize::new(0));

        let producer = {
            let written = written.clone();
            std::thread::spawn(move || {
                let chunk = [b'x'; CHUNK];
                while written.load(Ordering::SeqCst) < TOTAL {
                    writer.write_all(&chunk).unwrap();
                    written.fetch_add(CHUNK, Ordering::SeqCst);
                }
            })
        };

        // Nothing is reading yet: the producer must stall at the buffer size.
        std::thread::sleep(Duration::from_millis(300));
        let buffered = written.load(Ordering::SeqCst);
        assert!(buffered > 0, "producer never wrote");
        assert!(
            buffered <= DEFAULT_PIPE_CAPACITY,
            "buffered {buffered} bytes, capacity {DEFAULT_PIPE_CAPACITY}"
        );

        let mut drained = Vec::new();
        reader.read_to_end(&mut drained).unwrap();
        producer.join().unwrap();

        assert_eq!(drained.len(), TOTAL);
        assert!(drained.iter().all(|b| *b == b'x'));
    }
}
