//! Observers that are told about every frame put on the network. They are used for
//! visualization and scoring only, and never affect delivery.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::network::packet::Frame;
use crate::utility::pcap_writer::PcapWriter;

pub trait NetworkObserver: Send {
    /// A new frame entered the outbox. `sequence` is the frame's position in the outbox order.
    fn frame_transmitted(&mut self, frame: &Frame, sequence: u64);

    /// A guest reported reaching a named point (ex: a lesson test passing).
    fn milestone_reached(&mut self, _name: &str) {}
}

#[derive(Debug, Default)]
struct CaptureLogInner {
    frames: Vec<(u64, Frame)>,
    milestones: Vec<String>,
}

/// Records transmitted frames and milestones in memory. Clones share the same log, so one clone
/// can be given to the engine while another is kept to inspect it.
#[derive(Debug, Clone, Default)]
pub struct CaptureLog {
    inner: Arc<Mutex<CaptureLogInner>>,
}

impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The transmitted frames with their sequence numbers, oldest first.
    pub fn frames(&self) -> Vec<(u64, Frame)> {
        self.inner.lock().unwrap().frames.clone()
    }

    pub fn milestones(&self) -> Vec<String> {
        self.inner.lock().unwrap().milestones.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.frames.clear();
        inner.milestones.clear();
    }
}

impl NetworkObserver for CaptureLog {
    fn frame_transmitted(&mut self, frame: &Frame, sequence: u64) {
        self.inner
            .lock()
            .unwrap()
            .frames
            .push((sequence, frame.clone()));
    }

    fn milestone_reached(&mut self, name: &str) {
        self.inner.lock().unwrap().milestones.push(name.to_string());
    }
}

/// Writes transmitted frames to a pcap file. There is no clock in the network, so each frame's
/// timestamp is its sequence number in microseconds.
pub struct PcapCapture<W: Write> {
    writer: Option<PcapWriter<W>>,
}

impl<W: Write> PcapCapture<W> {
    /// The largest possible frame, so frames are never truncated.
    pub const CAPTURE_LEN: u32 = u16::MAX as u32;

    pub fn new(writer: W) -> std::io::Result<Self> {
        Ok(Self {
            writer: Some(PcapWriter::new(writer, Self::CAPTURE_LEN)?),
        })
    }

    /// Whether the capture is still being written. A capture stops after the first write error.
    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.writer {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn into_inner(mut self) -> Option<W> {
        self.writer.take().map(PcapWriter::into_inner)
    }
}

impl<W: Write + Send> NetworkObserver for PcapCapture<W> {
    fn frame_transmitted(&mut self, frame: &Frame, sequence: u64) {
        let Some(writer) = &mut self.writer else {
            return;
        };

        let ts_sec = u32::try_from(sequence / 1_000_000).unwrap_or(u32::MAX);
        let ts_usec = (sequence % 1_000_000) as u32;

        if let Err(e) = writer.write_display(ts_sec, ts_usec, frame) {
            log::warn!("Stopping packet capture after write error: {e}");
            self.writer = None;
        }
    }
}

impl<W: Write> Drop for PcapCapture<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("Could not flush packet capture: {e}");
        }
    }
}
