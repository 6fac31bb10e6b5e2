//! JSONL sink for `event-collator`. Writes one summary event per line.
//! Always appends; bring your own path.

use event_collator::{BoxSinkFuture, SummaryBatch, SummarySink};
use std::io;
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};
use tracing::trace;

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode(batch: &SummaryBatch) -> io::Result<String> {
    let mut out = String::new();
    for event in batch {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    Ok(out)
}

impl tower_service::Service<SummaryBatch> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = BoxSinkFuture<io::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: SummaryBatch) -> Self::Future {
        let path = self.path.clone();
        let lines = encode(&batch);
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let lines = lines?;
            if lines.is_empty() {
                return Ok(());
            }
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(lines.as_bytes()).await?;
            file.flush().await?;
            trace!(
                target: "event_collator::sink",
                path = %path.display(),
                events = batch.len(),
                "appended summaries"
            );
            Ok(())
        })
    }
}

impl SummarySink for JsonlSink {
    type SinkError = io::Error;
    type SinkFuture = BoxSinkFuture<io::Error>;
}
