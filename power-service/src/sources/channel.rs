use std::sync::Mutex;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// In-process feed: whatever is sent on the paired [`mpsc::Sender`] flows
/// into the pipeline. The stream ends once every sender is dropped.
pub struct ChannelSource<T> {
    rx: Mutex<Option<mpsc::Receiver<T>>>,
}

impl<T: Send + 'static> ChannelSource<T> {
    pub fn new(capacity: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                rx: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> Source<T> for ChannelSource<T> {
    async fn stream(&self) -> EnvelopeStream<T> {
        let rx = self.rx.lock().ok().and_then(|mut guard| guard.take());
        match rx {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(|payload| Ok(Envelope::now(payload)))),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source("channel source already consumed".to_string()))
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_until_senders_drop() {
        let (tx, source) = ChannelSource::<u32>::new(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        let items: Vec<u32> = source
            .stream()
            .await
            .map(|r| r.unwrap().payload)
            .collect()
            .await;
        assert_eq!(items, vec![1, 2]);

        let again: Vec<_> = source.stream().await.collect().await;
        assert!(again[0].is_err());
    }
}
