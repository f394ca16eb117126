//! The benchmark phases and their timing report.
//!
//! A run consists of an upload of random bytes to a fresh `trace_<uuid>` object, followed by a
//! ranged download of the head of that object. The download reads a small head, pauses, and
//! then reads the rest of the range from the same stream. All delays are real sleeps, so the
//! reported durations include them.

use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;
use yansi::Paint;

use crate::config::{Config, Phases};
use crate::payload::Payload;
use crate::remote::{RangeReader, Remote};
use crate::spans::PhaseSpans;

/// Outcome of a single upload or download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseReport {
    /// The object the phase operated on.
    pub object: String,
    /// Wall clock duration of the phase, including all delays.
    pub elapsed: Duration,
    /// Number of bytes transferred.
    pub bytes: u64,
}

/// Outcome of the listing phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListReport {
    /// Wall clock duration of the listing.
    pub elapsed: Duration,
    /// Number of objects in the bucket.
    pub objects: u64,
}

/// Timings of a full run.
#[derive(Clone, Debug)]
pub struct Summary {
    /// The upload phase.
    pub upload: PhaseReport,
    /// The download phase.
    pub download: PhaseReport,
    /// The listing phase, if it ran.
    pub list: Option<ListReport>,
}

impl Summary {
    /// Returns the sum of all measured phase durations.
    pub fn total(&self) -> Duration {
        let list = self.list.as_ref().map_or(Duration::ZERO, |list| list.elapsed);
        self.upload.elapsed + self.download.elapsed + list
    }

    /// Prints the timings to stdout.
    pub fn print(&self) {
        println!();
        println!("{} {}", "## Object".bold(), self.upload.object.bold().blue());
        print_phase("UPLOAD:", &self.upload);
        print_phase("DOWNLOAD:", &self.download);
        if let Some(list) = &self.list {
            println!(
                "{} {:.2?} ({} objects)",
                "LIST:".bold().green(),
                list.elapsed.bold(),
                list.objects
            );
        }
        println!();
        println!("time of all ops: {:.2?}", self.total().bold());
    }
}

fn print_phase(label: &str, report: &PhaseReport) {
    println!(
        "{} {:.2?} ({:.2})",
        label.bold().green(),
        report.elapsed.bold(),
        ByteSize::b(report.bytes)
    );
}

/// Runs all configured phases against `remote` in sequence.
///
/// The upload must succeed for the download to start. Any failure aborts the run.
pub async fn run(remote: &dyn Remote, config: &Config) -> Result<Summary> {
    let spans = PhaseSpans::new(config.add_spans, config.api);
    let phases = &config.phases;

    let upload = upload(remote, phases, spans).await?;
    tracing::info!(
        object = %upload.object,
        elapsed = ?upload.elapsed,
        "upload finished"
    );

    let download = download(remote, &upload.object, phases, spans).await?;
    tracing::info!(
        object = %download.object,
        elapsed = ?download.elapsed,
        "download finished"
    );

    let list = if config.list_objects {
        let list = list_objects(remote, spans).await?;
        tracing::info!(objects = list.objects, elapsed = ?list.elapsed, "listing finished");
        Some(list)
    } else {
        None
    };

    Ok(Summary {
        upload,
        download,
        list,
    })
}

/// Uploads `upload_size` random bytes to a new object.
///
/// The write stream is opened first and only written to after `pre_upload_delay`. The timer
/// starts before the object name is generated and stops once the upload is committed.
pub async fn upload(
    remote: &dyn Remote,
    phases: &Phases,
    spans: PhaseSpans,
) -> Result<PhaseReport> {
    let start = Instant::now();
    let object = format!("trace_{}", Uuid::new_v4());
    let span = spans.phase("upload", Some(object.as_str()));

    let bytes = async {
        let mut writer = remote.writer(&object);
        tokio::time::sleep(phases.pre_upload_delay).await;

        let mut payload = Payload::random(phases.upload_size.as_u64());
        let copied = tokio::io::copy(&mut payload, &mut writer).await;

        // A failed upload breaks the pipe, so its error takes precedence.
        let closed = writer.close().await.context("failed to upload object");
        let bytes = copied.context("failed to write payload")?;
        closed?;
        anyhow::Ok(bytes)
    }
    .instrument(span)
    .await?;

    Ok(PhaseReport {
        object,
        elapsed: start.elapsed(),
        bytes,
    })
}

/// Reads the first `read_range` bytes of `object` in two parts separated by `pause`.
///
/// Opening the stream counts towards the head read. After the tail has been read, the stream
/// stays open for `tail_delay` before it is closed.
pub async fn download(
    remote: &dyn Remote,
    object: &str,
    phases: &Phases,
    spans: PhaseSpans,
) -> Result<PhaseReport> {
    let start = Instant::now();
    let range = 0..phases.read_range.as_u64();
    let head = phases.head_read.as_u64();
    let tail = phases.tail_read();

    let bytes = async {
        let mut reader = async {
            let mut reader = remote
                .range_reader(object, range)
                .await
                .context("failed to open range reader")?;
            discard_exact(&mut reader, head)
                .await
                .context("failed to read head of object")?;
            anyhow::Ok(reader)
        }
        .instrument(spans.phase("download.head", Some(object)))
        .await?;

        tokio::time::sleep(phases.pause).await;

        discard_exact(&mut reader, tail)
            .instrument(spans.phase("download.tail", Some(object)))
            .await
            .context("failed to read tail of object")?;

        tokio::time::sleep(phases.tail_delay).await;
        reader.close();

        anyhow::Ok(head + tail)
    }
    .instrument(spans.phase("download", Some(object)))
    .await?;

    Ok(PhaseReport {
        object: object.to_owned(),
        elapsed: start.elapsed(),
        bytes,
    })
}

/// Enumerates all objects in the bucket.
pub async fn list_objects(remote: &dyn Remote, spans: PhaseSpans) -> Result<ListReport> {
    let start = Instant::now();

    let objects = remote
        .list_objects()
        .instrument(spans.phase("list", None))
        .await
        .context("failed to list objects")?;

    Ok(ListReport {
        elapsed: start.elapsed(),
        objects,
    })
}

/// Reads exactly `len` bytes from `reader` and throws them away.
async fn discard_exact(reader: &mut RangeReader, len: u64) -> std::io::Result<()> {
    let read = tokio::io::copy(&mut (&mut *reader).take(len), &mut tokio::io::sink()).await?;
    if read < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            ShortRead { read, len },
        ));
    }
    Ok(())
}

#[derive(Debug, Error)]
#[error("stream ended after {read} of {len} bytes")]
struct ShortRead {
    read: u64,
    len: u64,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing::subscriber::Subscriber;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::{Layer, Registry};

    use super::*;
    use crate::api::Api;
    use crate::remote::RemoteError;
    use crate::remote::in_memory::InMemoryRemote;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum SpanEvent {
        Open {
            name: String,
            parent: Option<String>,
        },
        Close(String),
    }

    /// Records the `otel.name` of phase spans as they open and close.
    #[derive(Clone, Default)]
    struct Recorder {
        names: Arc<Mutex<HashMap<Id, String>>>,
        events: Arc<Mutex<Vec<SpanEvent>>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<SpanEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct NameVisitor(Option<String>);

    impl Visit for NameVisitor {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "otel.name" {
                self.0 = Some(value.to_owned());
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
    }

    impl<S: Subscriber> Layer<S> for Recorder {
        fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
            let mut visitor = NameVisitor::default();
            attrs.record(&mut visitor);
            let Some(name) = visitor.0 else { return };

            let parent_id = if attrs.is_contextual() {
                ctx.current_span().id().cloned()
            } else {
                attrs.parent().cloned()
            };

            let mut names = self.names.lock().unwrap();
            let parent = parent_id.and_then(|parent| names.get(&parent).cloned());
            names.insert(id.clone(), name.clone());

            self.events
                .lock()
                .unwrap()
                .push(SpanEvent::Open { name, parent });
        }

        fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
            if let Some(name) = self.names.lock().unwrap().remove(&id) {
                self.events.lock().unwrap().push(SpanEvent::Close(name));
            }
        }
    }

    fn record_spans() -> (Recorder, tracing::subscriber::DefaultGuard) {
        let recorder = Recorder::default();
        let subscriber = Registry::default().with(recorder.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (recorder, guard)
    }

    fn open(name: &str, parent: Option<&str>) -> SpanEvent {
        SpanEvent::Open {
            name: name.into(),
            parent: parent.map(Into::into),
        }
    }

    fn close(name: &str) -> SpanEvent {
        SpanEvent::Close(name.into())
    }

    fn disabled() -> PhaseSpans {
        PhaseSpans::new(false, Api::Http2)
    }

    #[tokio::test(start_paused = true)]
    async fn upload_writes_full_payload() {
        let remote = InMemoryRemote::new();
        let phases = Phases::default();

        let report = upload(&remote, &phases, disabled()).await.unwrap();

        assert!(report.object.starts_with("trace_"));
        assert_eq!(report.bytes, 10 * 1024 * 1024);
        let stored = remote.get(&report.object).unwrap();
        assert_eq!(stored.len(), 10 * 1024 * 1024);
        assert!(report.elapsed >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_names_are_unique() {
        let remote = InMemoryRemote::new();
        let phases = Phases {
            upload_size: ByteSize::kib(1),
            ..Phases::default()
        };

        let first = upload(&remote, &phases, disabled()).await.unwrap();
        let second = upload(&remote, &phases, disabled()).await.unwrap();
        assert_ne!(first.object, second.object);
    }

    #[tokio::test(start_paused = true)]
    async fn download_reads_requested_range() {
        let remote = InMemoryRemote::new();
        remote.insert("trace_x", vec![7u8; 10 * 1024 * 1024]);
        let phases = Phases::default();

        let report = download(&remote, "trace_x", &phases, disabled())
            .await
            .unwrap();

        assert_eq!(report.bytes, 1024 * 1024);
        assert_eq!(remote.reads(), vec![("trace_x".to_owned(), 0..1024 * 1024)]);
        assert!(report.elapsed >= Duration::from_secs(105));
    }

    #[tokio::test(start_paused = true)]
    async fn download_fails_on_short_object() {
        let remote = InMemoryRemote::new();
        remote.insert("short", vec![0u8; 4096]);
        let phases = Phases::default();

        let err = download(&remote, "short", &phases, disabled())
            .await
            .unwrap_err();

        let io_err = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io_err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test(start_paused = true)]
    async fn download_fails_on_missing_object() {
        let remote = InMemoryRemote::new();

        let err = download(&remote, "missing", &Phases::default(), disabled())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RemoteError>(),
            Some(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn total_is_sum_of_phases() {
        let remote = InMemoryRemote::new();
        let config = Config {
            list_objects: true,
            ..Config::default()
        };

        let summary = run(&remote, &config).await.unwrap();

        assert_eq!(summary.upload.object, summary.download.object);
        assert_eq!(summary.list.as_ref().unwrap().objects, 1);
        assert_eq!(
            summary.total(),
            summary.upload.elapsed
                + summary.download.elapsed
                + summary.list.as_ref().unwrap().elapsed
        );
        // 1s before the upload, 100s pause and 5s before closing the reader
        assert!(summary.total() >= Duration::from_secs(106));
        assert!(summary.total() < Duration::from_secs(107));
    }

    #[tokio::test(start_paused = true)]
    async fn no_spans_when_disabled() {
        let (recorder, _guard) = record_spans();
        let remote = InMemoryRemote::new();

        run(&remote, &Config::default()).await.unwrap();

        assert!(recorder.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn download_spans_are_sequential() {
        let (recorder, _guard) = record_spans();
        let remote = InMemoryRemote::new();
        remote.insert("trace_x", vec![0u8; 2 * 1024 * 1024]);
        let spans = PhaseSpans::new(true, Api::Http1);

        download(&remote, "trace_x", &Phases::default(), spans)
            .await
            .unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                open("download", None),
                open("download.head", Some("download")),
                close("download.head"),
                open("download.tail", Some("download")),
                close("download.tail"),
                close("download"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_emits_phase_spans() {
        let (recorder, _guard) = record_spans();
        let remote = InMemoryRemote::new();
        let config = Config {
            add_spans: true,
            list_objects: true,
            ..Config::default()
        };

        run(&remote, &config).await.unwrap();

        let opened: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|event| match event {
                SpanEvent::Open { name, .. } => Some(name),
                SpanEvent::Close(_) => None,
            })
            .collect();
        assert_eq!(
            opened,
            ["upload", "download", "download.head", "download.tail", "list"]
        );
    }
}
