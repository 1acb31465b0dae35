//! Bidirectional relay pipe
//!
//! A [`Pipe`] copies bytes between two duplex streams with one task per
//! direction. Each direction ends on EOF, error or [`Pipe::stop`]; an ended
//! direction half-closes its destination. When the second direction ends the
//! pipe stops running, both streams are dropped and waiters are released.
//!
//! ```text
//!            left -> right
//!   left  ==================  right
//!            left <- right
//! ```

use crate::helper::CloseSignal;
use crate::socks::consts::DEFAULT_BUFFER_SIZE;
use crate::transport::{BoxedStream, StreamDyn};
use anyhow::{bail, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace};

/// Direction of a chunk travelling through a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the left stream to the right stream
    LeftToRight,
    /// From the right stream to the left stream
    RightToLeft,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LeftToRight => write!(f, "->"),
            Direction::RightToLeft => write!(f, "<-"),
        }
    }
}

/// Observes, and may rewrite, every chunk before it is forwarded
pub trait PipeInspector: Send + Sync + fmt::Debug {
    /// Return the bytes to forward in place of `data`
    fn inspect(&self, direction: Direction, data: Bytes) -> Bytes;
}

/// Bytes forwarded by a pipe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeStats {
    /// Bytes written to the right stream
    pub left_to_right: u64,
    /// Bytes written to the left stream
    pub right_to_left: u64,
}

#[derive(Debug)]
struct Shared {
    name: String,
    running: AtomicBool,
    active: AtomicUsize,
    stop: CloseSignal,
    done: CloseSignal,
    left_to_right: AtomicU64,
    right_to_left: AtomicU64,
}

impl Shared {
    fn stats(&self) -> PipeStats {
        PipeStats {
            left_to_right: self.left_to_right.load(Ordering::Relaxed),
            right_to_left: self.right_to_left.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, direction: Direction) -> &AtomicU64 {
        match direction {
            Direction::LeftToRight => &self.left_to_right,
            Direction::RightToLeft => &self.right_to_left,
        }
    }
}

/// A relay between two duplex streams
#[derive(Debug)]
pub struct Pipe {
    shared: Arc<Shared>,
    buffer_size: usize,
    inspector: Option<Arc<dyn PipeInspector>>,
    streams: Option<(BoxedStream, BoxedStream)>,
}

impl Pipe {
    /// Create a pipe between `left` and `right`; nothing is copied until
    /// [`Pipe::start`]
    pub fn new<L, R>(name: impl Into<String>, left: L, right: R) -> Self
    where
        L: StreamDyn + 'static,
        R: StreamDyn + 'static,
    {
        Pipe {
            shared: Arc::new(Shared {
                name: name.into(),
                running: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                stop: CloseSignal::new(),
                done: CloseSignal::new(),
                left_to_right: AtomicU64::new(0),
                right_to_left: AtomicU64::new(0),
            }),
            buffer_size: DEFAULT_BUFFER_SIZE,
            inspector: None,
            streams: Some((Box::new(left), Box::new(right))),
        }
    }

    /// Set the per-direction copy buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Register an inspection hook
    pub fn with_inspector(mut self, inspector: Arc<dyn PipeInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Display name used in logs
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn both copy loops
    pub fn start(&mut self) -> Result<()> {
        let (left, right) = match self.streams.take() {
            Some(streams) => streams,
            None => bail!("Pipe {} already started", self.shared.name),
        };

        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);

        self.shared.active.store(2, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        debug!("Pipe {} started", self.shared.name);

        tokio::spawn(copy_loop(
            left_read,
            right_write,
            Direction::LeftToRight,
            self.shared.clone(),
            self.inspector.clone(),
            self.buffer_size,
        ));
        tokio::spawn(copy_loop(
            right_read,
            left_write,
            Direction::RightToLeft,
            self.shared.clone(),
            self.inspector.clone(),
            self.buffer_size,
        ));

        Ok(())
    }

    /// Stop both directions; safe to call any number of times
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if self.shared.stop.trigger() {
            debug!("Pipe {} stop requested", self.shared.name);
        }
    }

    /// Whether at least one direction is still copying
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Wait until both directions have ended
    ///
    /// Returns immediately for a pipe that was never started.
    pub async fn wait(&self) -> PipeStats {
        if self.streams.is_none() {
            self.shared.done.wait().await;
        }
        self.shared.stats()
    }

    /// Bytes forwarded so far
    pub fn stats(&self) -> PipeStats {
        self.shared.stats()
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.shared.stop.trigger();
    }
}

async fn copy_loop(
    mut reader: ReadHalf<BoxedStream>,
    mut writer: WriteHalf<BoxedStream>,
    direction: Direction,
    shared: Arc<Shared>,
    inspector: Option<Arc<dyn PipeInspector>>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];

    let result: std::io::Result<()> = async {
        loop {
            let n = tokio::select! {
                _ = shared.stop.wait() => return Ok(()),
                read = reader.read(&mut buf) => read?,
            };
            if n == 0 {
                return Ok(());
            }

            let chunk = match &inspector {
                Some(inspector) => inspector.inspect(direction, Bytes::copy_from_slice(&buf[..n])),
                None => Bytes::copy_from_slice(&buf[..n]),
            };

            tokio::select! {
                _ = shared.stop.wait() => return Ok(()),
                written = async {
                    writer.write_all(&chunk).await?;
                    writer.flush().await
                } => written?,
            }
            shared
                .counter(direction)
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
    }
    .await;

    match result {
        Ok(()) => trace!("Pipe {} {} finished", shared.name, direction),
        Err(e) => debug!("Pipe {} {} ended with error: {}", shared.name, direction, e),
    }

    // Propagate EOF to the destination
    let _ = writer.shutdown().await;

    if shared.active.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.running.store(false, Ordering::Release);
        let stats = shared.stats();
        debug!(
            "Pipe {} closed ({} bytes ->, {} bytes <-)",
            shared.name, stats.left_to_right, stats.right_to_left
        );
        shared.done.trigger();
    }
}
