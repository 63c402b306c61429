use std::path::PathBuf;

use async_stream::stream;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::household::ToggleEvent;
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Toggle events read from a file, one JSON object per line:
///
/// ```text
/// {"household_id":"h-001","appliance_id":"kettle","is_on":true}
/// ```
///
/// Blank lines are skipped. A malformed line is reported as an error item and
/// reading continues with the next line.
pub struct NdjsonToggleSource {
    path: PathBuf,
}

impl NdjsonToggleSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

pub fn parse_toggle_line(line: &str) -> Result<Option<ToggleEvent>, PipelineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| PipelineError::Source(format!("failed to parse toggle json line: {e}")))
}

#[async_trait::async_trait]
impl Source<ToggleEvent> for NdjsonToggleSource {
    async fn stream(&self) -> EnvelopeStream<ToggleEvent> {
        let path = self.path.clone();
        let s = stream! {
            let file = match File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open toggle file {}: {e}", path.display())));
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_toggle_line(&line) {
                        Ok(Some(event)) => yield Ok(Envelope::now(event)),
                        Ok(None) => {}
                        Err(e) => {
                            metrics::counter!("toggle_feed_parse_errors_total").increment(1);
                            yield Err(e);
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(PipelineError::Source(format!("failed to read toggle line: {e}")));
                        break;
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;

    #[test]
    fn parses_a_toggle_line() {
        let event = parse_toggle_line(r#"{"household_id":"h1","appliance_id":"tv","is_on":true}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.household_id, "h1");
        assert_eq!(event.appliance_id, "tv");
        assert!(event.is_on);
    }

    #[test]
    fn blank_lines_are_skipped_and_garbage_is_an_error() {
        assert!(parse_toggle_line("   ").unwrap().is_none());
        assert!(matches!(parse_toggle_line("{not json"), Err(PipelineError::Source(_))));
    }

    #[tokio::test]
    async fn bad_lines_do_not_end_the_stream() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"household_id":"h1","appliance_id":"kettle","is_on":true}}"#).unwrap();
        writeln!(file, "oops").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"household_id":"h1","appliance_id":"kettle","is_on":false}}"#).unwrap();
        file.flush().unwrap();

        let items: Vec<_> = NdjsonToggleSource::new(file.path()).stream().await.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert!(!items[2].as_ref().unwrap().payload.is_on);
    }

    #[tokio::test]
    async fn missing_file_yields_one_error() {
        let items: Vec<_> = NdjsonToggleSource::new("/definitely/not/here.ndjson")
            .stream()
            .await
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
