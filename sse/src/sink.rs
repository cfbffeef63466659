//! Outbound byte sinks for connections.
//!
//! A [`Sink`] is the transport's half of a connection: the channel writes
//! whole frames into it and never owns the socket behind it. Whether a sink
//! buffers (and so needs an explicit flush) is fixed when it is constructed.
use crate::error::{Error, Result};
use crate::message::Frame;
use log::*;
use std::io::{BufWriter, Write};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub trait Sink: Send + Sync + 'static {
    /// Queues one frame. Frames are written whole, never interleaved with
    /// other frames for the same sink.
    ///
    /// Implementations must not block on the network: the channel calls
    /// this for every connection in turn while holding its history lock.
    fn write(&self, frame: &Frame) -> Result<()>;

    /// Whether this sink buffers writes and needs [`Sink::flush`] to push
    /// them to the network.
    fn supports_flush(&self) -> bool {
        false
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Terminates the underlying stream.
    fn end(&self);
}

/// Sink backed by an unbounded tokio channel. The receiver is typically
/// turned into an HTTP response body; dropping it makes writes fail.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Mutex<Option<UnboundedSender<Frame>>>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

}

impl Sink for ChannelSink {
    fn write(&self, frame: &Frame) -> Result<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(frame.clone()).map_err(|_| Error::closed()),
            None => Err(Error::closed()),
        }
    }

    fn end(&self) {
        // Dropping the only sender lets the receiver drain and then finish.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

enum WriterCommand {
    Write(Frame),
    Flush,
}

/// Sink over any blocking writer. Frames are handed to a dedicated writer
/// thread, so a stalled writer only backs up its own queue.
pub struct WriterSink<W: Write + Send + 'static> {
    commands: Mutex<Option<UnboundedSender<WriterCommand>>>,
    worker: Mutex<Option<JoinHandle<Option<W>>>>,
}

impl<W: Write + Send + 'static> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let worker = thread::spawn(move || {
            let mut writer = BufWriter::new(writer);
            while let Some(command) = rx.blocking_recv() {
                let outcome = match command {
                    WriterCommand::Write(frame) => writer.write_all(frame.as_bytes()),
                    WriterCommand::Flush => writer.flush(),
                };
                if let Err(e) = outcome {
                    warn!("Writer sink failed, dropping further frames: {e}");
                    return None;
                }
            }
            if let Err(e) = writer.flush() {
                debug!("Failed to flush writer sink while ending it: {e}");
            }
            writer.into_inner().ok()
        });

        Self {
            commands: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Ends the sink, waits for queued frames to be written and hands back
    /// the writer. `None` if writing failed.
    pub fn into_inner(self) -> Option<W> {
        self.end();
        self.worker
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .and_then(|worker| worker.join().ok().flatten())
    }

    fn submit(&self, command: WriterCommand) -> Result<()> {
        let commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        match commands.as_ref() {
            Some(tx) => tx.send(command).map_err(|_| Error::closed()),
            None => Err(Error::closed()),
        }
    }
}

impl<W: Write + Send + 'static> Sink for WriterSink<W> {
    fn write(&self, frame: &Frame) -> Result<()> {
        self.submit(WriterCommand::Write(frame.clone()))
    }

    fn supports_flush(&self) -> bool {
        true
    }

    fn flush(&self) -> Result<()> {
        self.submit(WriterCommand::Flush)
    }

    fn end(&self) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
