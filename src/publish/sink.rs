//! Frame sinks: where the publish loop hands frames off

use std::time::{Duration, Instant};

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info};

use crate::capture::Frame;
use crate::error::SinkError;

/// Consumer of paced frames, typically a real-time media client's video source.
///
/// `submit` is called from the publish task once per cycle and should return
/// quickly relative to the frame interval.
pub trait FrameSink: Send {
    fn submit(&mut self, frame: Frame) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn submit(&mut self, frame: Frame) -> Result<(), SinkError> {
        (**self).submit(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Logs and drops every frame. Useful as a dry run.
#[derive(Debug, Default)]
pub struct LogSink {
    submitted: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl FrameSink for LogSink {
    fn submit(&mut self, frame: Frame) -> Result<(), SinkError> {
        self.submitted += 1;
        if self.submitted % 30 == 1 {
            debug!(
                sequence = frame.meta.sequence,
                width = frame.meta.width,
                height = frame.meta.height,
                latency_ms = frame.age().as_secs_f64() * 1000.0,
                "Frame submitted"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Hands frames to an in-process consumer over a bounded channel.
///
/// Never waits: a full channel is reported as backpressure and the frame is
/// dropped, a dropped receiver closes the sink.
pub struct ChannelSink {
    tx: Sender<Frame>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Frame>) {
        let (tx, rx) = flume::bounded(capacity);
        info!("Channel sink created with capacity {}", capacity);
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn submit(&mut self, frame: Frame) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Backpressure,
            TrySendError::Disconnected(_) => SinkError::Closed,
        })
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Presentation timestamps for a live sink, taken from submit time.
///
/// Frames can leave the pacing buffer out of capture order, so capture time
/// is not usable as a PTS. Stamps start at zero and strictly increase.
#[derive(Debug, Default)]
pub struct PtsClock {
    base: Option<Instant>,
    last: Option<Duration>,
}

impl PtsClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// PTS for a buffer submitted at `now`.
    pub fn stamp(&mut self, now: Instant) -> Duration {
        let base = *self.base.get_or_insert(now);
        let mut pts = now.saturating_duration_since(base);
        if let Some(last) = self.last {
            if pts <= last {
                pts = last + Duration::from_nanos(1);
            }
        }
        self.last = Some(pts);
        pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DecodedFrame, PixelFormat};

    fn frame(sequence: u64) -> Frame {
        Frame::from_decoded(DecodedFrame::new(vec![0; 4], 1, 1, PixelFormat::Rgba), sequence, 0)
    }

    #[test]
    fn test_log_sink_counts() {
        let mut sink = LogSink::new();
        sink.submit(frame(1)).unwrap();
        sink.submit(frame(2)).unwrap();
        assert_eq!(sink.submitted(), 2);
        assert_eq!(sink.name(), "log");
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (mut sink, rx) = ChannelSink::bounded(2);
        sink.submit(frame(1)).unwrap();
        assert_eq!(rx.try_recv().unwrap().meta.sequence, 1);
    }

    #[test]
    fn test_channel_sink_backpressure() {
        let (mut sink, _rx) = ChannelSink::bounded(1);
        sink.submit(frame(1)).unwrap();
        assert!(matches!(sink.submit(frame(2)), Err(SinkError::Backpressure)));
    }

    #[test]
    fn test_channel_sink_closed() {
        let (mut sink, rx) = ChannelSink::bounded(1);
        drop(rx);
        assert!(matches!(sink.submit(frame(1)), Err(SinkError::Closed)));
    }

    #[test]
    fn test_pts_follows_submit_time() {
        let mut clock = PtsClock::new();
        let t0 = Instant::now();
        assert_eq!(clock.stamp(t0), Duration::ZERO);
        assert_eq!(clock.stamp(t0 + Duration::from_millis(33)), Duration::from_millis(33));
        assert_eq!(clock.stamp(t0 + Duration::from_millis(66)), Duration::from_millis(66));
    }

    #[test]
    fn test_pts_never_goes_backward() {
        // drain after capture stops: 10, 9, 8 submitted back to back
        let mut clock = PtsClock::new();
        let t0 = Instant::now() + Duration::from_secs(1);
        let mut stamps = vec![clock.stamp(t0)];
        stamps.push(clock.stamp(t0));
        stamps.push(clock.stamp(t0 - Duration::from_millis(5)));
        stamps.push(clock.stamp(t0 + Duration::from_millis(33)));

        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "stamps = {:?}", stamps);
        assert_eq!(stamps[3], Duration::from_millis(33));
    }
}
