use log::warn;

use super::ReadsWriter;
use crate::error::{WriterError, WriterResult};
use crate::record::SeqRecord;

/// Fans every record out to an ordered list of sinks.
///
/// A sink that fails is recorded and skipped from then on; the others keep
/// receiving every record. The failures surface from [`ReadsWriter::finish`].
pub struct CompoundReadsWriter {
    sinks: Vec<Box<dyn ReadsWriter>>,
    /// First failure per sink.
    failures: Vec<Option<WriterError>>,
    finished: bool,
}

impl CompoundReadsWriter {
    /// Fans every record out to `sinks`, in order.
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn ReadsWriter>>) -> Self {
        let failures = sinks.iter().map(|_| None).collect();
        Self {
            sinks,
            failures,
            finished: false,
        }
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Number of sinks that failed so far.
    #[must_use]
    pub fn failed_sinks(&self) -> usize {
        self.failures.iter().filter(|f| f.is_some()).count()
    }
}

impl ReadsWriter for CompoundReadsWriter {
    fn write_read(&mut self, record: &SeqRecord) -> WriterResult<()> {
        if self.finished {
            return Err(WriterError::Finished);
        }
        for (idx, (sink, failure)) in self.sinks.iter_mut().zip(self.failures.iter_mut()).enumerate() {
            if failure.is_some() {
                continue;
            }
            if let Err(err) = sink.write_read(record) {
                warn!("Reads sink {idx} failed, skipping it for the rest of the run: {err}");
                *failure = Some(err);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> WriterResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut failures = Vec::new();
        for (idx, (sink, failure)) in self.sinks.iter_mut().zip(self.failures.iter_mut()).enumerate() {
            let finished = sink.finish();
            if let Some(err) = failure.take() {
                failures.push(format!("sink {idx}: {err}"));
            } else if let Err(err) = finished {
                failures.push(format!("sink {idx}: {err}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(WriterError::SinkFailures { failures })
        }
    }
}

impl Drop for CompoundReadsWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!("Reads writer failures at teardown: {err}");
        }
    }
}

impl std::fmt::Debug for CompoundReadsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundReadsWriter")
            .field("sinks", &self.sinks.len())
            .field("failed_sinks", &self.failed_sinks())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ArrayReadsWriter;

    #[derive(Debug)]
    struct FailingSink {
        fail_after: usize,
        written: usize,
    }

    impl ReadsWriter for FailingSink {
        fn write_read(&mut self, _record: &SeqRecord) -> WriterResult<()> {
            if self.written >= self.fail_after {
                return Err(WriterError::io("sink", std::io::ErrorKind::Other.into()));
            }
            self.written += 1;
            Ok(())
        }

        fn finish(&mut self) -> WriterResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failing_sink_is_isolated_and_reported_once() {
        let good = ArrayReadsWriter::new();
        let mut writer = CompoundReadsWriter::new(vec![
            Box::new(FailingSink {
                fail_after: 1,
                written: 0,
            }),
            Box::new(good.clone()),
        ]);
        for i in 0..3 {
            writer
                .write_read(&SeqRecord::without_description(format!("read{i}"), "ACGT"))
                .unwrap();
        }
        assert_eq!(good.len(), 3);
        assert_eq!(writer.failed_sinks(), 1);

        let err = writer.finish().unwrap_err();
        let WriterError::SinkFailures { failures } = err else {
            panic!("expected SinkFailures");
        };
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("sink 0"));

        assert!(writer.finish().is_ok());
        assert!(matches!(
            writer.write_read(&SeqRecord::without_description("late", "A")),
            Err(WriterError::Finished)
        ));
    }
}
