//! Outbound half of the link
//!
//! Encoded frames are queued to a task that owns the write half, so a link
//! that stops draining never holds up reads, intents or timers. A frame that
//! cannot be written within the stall timeout ends the task with `TimedOut`.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Frames that may wait for the writer task
const WRITE_QUEUE_DEPTH: usize = 128;

pub(super) struct LinkWriter {
    frames: mpsc::Sender<Vec<u8>>,
    task: Option<JoinHandle<io::Result<()>>>,
    stall_timeout: Duration,
}

impl LinkWriter {
    pub(super) fn spawn<W>(writer: W, stall_timeout: Duration) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frames, queue) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let task = tokio::spawn(drain(writer, queue, stall_timeout));
        Self {
            frames,
            task: Some(task),
            stall_timeout,
        }
    }

    /// Queue one frame without waiting; the error is a fault reason
    pub(super) fn send(&self, frame: Vec<u8>) -> std::result::Result<(), String> {
        self.frames.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => "Link write queue full".to_string(),
            TrySendError::Closed(_) => "Link writer stopped".to_string(),
        })
    }

    /// Resolves with the reason once the writer task ends on its own
    ///
    /// Cancel-safe. Pending forever after it has resolved once.
    pub(super) async fn stopped(&mut self) -> io::Error {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let joined = task.await;
        self.task = None;

        match joined {
            Ok(Ok(())) => io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped"),
            Ok(Err(e)) => e,
            Err(e) => io::Error::new(io::ErrorKind::Other, e),
        }
    }

    /// Let queued frames drain, then shut the link down
    ///
    /// Gives up after one stall timeout.
    pub(super) async fn close(self) {
        let Self {
            frames,
            task,
            stall_timeout,
        } = self;
        drop(frames);

        let Some(mut task) = task else {
            return;
        };
        match timeout(stall_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => debug!("Link writer ended with: {}", e),
            Ok(Err(e)) => debug!("Link writer panicked: {}", e),
            Err(_) => {
                warn!("Link writer still blocked after {:?}; abandoning it", stall_timeout);
                task.abort();
            }
        }
    }
}

async fn drain<W>(mut writer: W, mut queue: mpsc::Receiver<Vec<u8>>, stall_timeout: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match timeout(stall_timeout, write).await {
            Ok(result) => result?,
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "write stalled")),
        }
    }
    writer.shutdown().await
}
