//! Paced publish loop: newest frame out of the buffer, into the sink, once per interval

use std::sync::Arc;

use metrics::{counter, histogram};
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

use super::sink::FrameSink;
use crate::pipeline::{Pacer, PacingBuffer, ShutdownListener};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub cycles: u64,
    pub frames_published: u64,
    pub empty_cycles: u64,
    pub sink_errors: u64,
}

pub struct PublishDriver<S> {
    buffer: Arc<PacingBuffer>,
    sink: S,
    framerate: watch::Receiver<Option<f64>>,
    shutdown: ShutdownListener,
}

impl<S: FrameSink> PublishDriver<S> {
    pub fn new(
        buffer: Arc<PacingBuffer>,
        sink: S,
        framerate: watch::Receiver<Option<f64>>,
        shutdown: ShutdownListener,
    ) -> Self {
        Self {
            buffer,
            sink,
            framerate,
            shutdown,
        }
    }

    /// Wait for the capture side to announce its frame rate. `None` if stop
    /// arrives first or the capture side goes away without announcing.
    async fn wait_for_framerate(&mut self) -> Option<f64> {
        loop {
            if let Some(fps) = *self.framerate.borrow_and_update() {
                return Some(fps);
            }
            tokio::select! {
                _ = self.shutdown.triggered() => return None,
                changed = self.framerate.changed() => {
                    if changed.is_err() {
                        warn!("Capture ended before announcing a frame rate");
                        return None;
                    }
                }
            }
        }
    }

    /// Run until the stop signal. Undelivered frames are left in the buffer.
    #[instrument(skip_all, name = "publish", fields(sink = self.sink.name()))]
    pub async fn run(mut self) -> PublishReport {
        let mut report = PublishReport::default();

        let Some(fps) = self.wait_for_framerate().await else {
            return report;
        };
        let Some(mut pacer) = Pacer::from_framerate(fps) else {
            warn!("Cannot publish at {} fps", fps);
            return report;
        };
        info!("Publishing at {:.3} fps (every {:?})", fps, pacer.interval());

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let start = pacer.begin_cycle();
            report.cycles += 1;

            match self.buffer.try_pop_latest() {
                Some(frame) => {
                    let sequence = frame.meta.sequence;
                    let latency = frame.age();
                    match self.sink.submit(frame) {
                        Ok(()) => {
                            report.frames_published += 1;
                            counter!("roomcast_frames_published_total").increment(1);
                            trace!(sequence, latency_ms = latency.as_secs_f64() * 1000.0, "Published frame");
                        }
                        Err(e) => {
                            report.sink_errors += 1;
                            counter!("roomcast_sink_errors_total").increment(1);
                            warn!(sequence, "Sink error: {}", e);
                        }
                    }
                }
                None => {
                    report.empty_cycles += 1;
                    trace!("Pacing buffer empty");
                }
            }

            histogram!("roomcast_publish_cycle_seconds").record(start.elapsed().as_secs_f64());
            let sleep = pacer.remaining();

            tokio::select! {
                _ = self.shutdown.triggered() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
            trace!(fps = 1.0 / start.elapsed().as_secs_f64(), "Publish loop rate");
        }

        debug!(overruns = pacer.overruns(), "Publish pacing overruns");
        info!(
            cycles = report.cycles,
            published = report.frames_published,
            empty = report.empty_cycles,
            sink_errors = report.sink_errors,
            "Publish loop stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DecodedFrame, Frame, PixelFormat};
    use crate::error::SinkError;
    use crate::pipeline::Shutdown;
    use crate::publish::ChannelSink;
    use std::time::Duration;

    fn frame(sequence: u64) -> Frame {
        Frame::from_decoded(DecodedFrame::new(vec![0; 4], 1, 1, PixelFormat::Rgba), sequence, 0)
    }

    struct FlakySink {
        calls: u64,
    }

    impl FrameSink for FlakySink {
        fn submit(&mut self, _frame: Frame) -> Result<(), SinkError> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                Err(SinkError::Rejected("transient".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    async fn stop_after(shutdown: Shutdown, after: Duration) {
        tokio::time::sleep(after).await;
        shutdown.trigger();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_newest_first_then_idles() {
        let buffer = Arc::new(PacingBuffer::new(3).unwrap());
        for seq in 1..=5 {
            buffer.push(frame(seq));
        }
        let (_fps_tx, fps_rx) = watch::channel(Some(10.0));
        let shutdown = Shutdown::new();
        let (sink, rx) = ChannelSink::bounded(16);

        let driver = PublishDriver::new(Arc::clone(&buffer), sink, fps_rx, shutdown.listener());
        let stopper = tokio::spawn(stop_after(shutdown, Duration::from_millis(1050)));
        let report = driver.run().await;
        stopper.await.unwrap();

        let published: Vec<u64> = rx.drain().map(|f| f.meta.sequence).collect();
        assert_eq!(published, vec![5, 4, 3]);
        assert_eq!(report.frames_published, 3);
        assert_eq!(report.sink_errors, 0);
        // ~100ms cadence over ~1s
        assert!((10..=12).contains(&report.cycles), "cycles = {}", report.cycles);
        assert_eq!(report.empty_cycles, report.cycles - 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_errors_do_not_stop_cadence() {
        let buffer = Arc::new(PacingBuffer::new(3).unwrap());
        let (fps_tx, fps_rx) = watch::channel(Some(20.0));
        let shutdown = Shutdown::new();
        let listener = shutdown.listener();

        let feeder = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                for seq in 1..=10 {
                    buffer.push(frame(seq));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                drop(fps_tx);
            })
        };

        let driver = PublishDriver::new(Arc::clone(&buffer), FlakySink { calls: 0 }, fps_rx, listener);
        let stopper = tokio::spawn(stop_after(shutdown, Duration::from_millis(1000)));
        let report = driver.run().await;
        feeder.await.unwrap();
        stopper.await.unwrap();

        assert!(report.sink_errors > 0);
        assert!(report.frames_published > 0);
        assert!(report.cycles >= 15, "cycles = {}", report.cycles);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_framerate() {
        let buffer = Arc::new(PacingBuffer::new(3).unwrap());
        buffer.push(frame(1));
        let (fps_tx, fps_rx) = watch::channel(None);
        let shutdown = Shutdown::new();
        let (sink, rx) = ChannelSink::bounded(4);

        let driver = PublishDriver::new(Arc::clone(&buffer), sink, fps_rx, shutdown.listener());
        let task = tokio::spawn(driver.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.is_empty(), "published before the frame rate was known");

        fps_tx.send_replace(Some(30.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        let report = task.await.unwrap();

        assert_eq!(report.frames_published, 1);
        assert_eq!(rx.try_recv().unwrap().meta.sequence, 1);
    }

    #[tokio::test]
    async fn test_exits_when_capture_never_announces() {
        let buffer = Arc::new(PacingBuffer::new(3).unwrap());
        let (fps_tx, fps_rx) = watch::channel(None);
        let shutdown = Shutdown::new();
        drop(fps_tx);

        let report = PublishDriver::new(buffer, LogSinkForTest, fps_rx, shutdown.listener())
            .run()
            .await;
        assert_eq!(report, PublishReport::default());
    }

    #[tokio::test]
    async fn test_stop_before_framerate() {
        let buffer = Arc::new(PacingBuffer::new(3).unwrap());
        let (_fps_tx, fps_rx) = watch::channel(None);
        let shutdown = Shutdown::new();
        let listener = shutdown.listener();
        shutdown.trigger();

        let report = PublishDriver::new(buffer, LogSinkForTest, fps_rx, listener).run().await;
        assert_eq!(report.cycles, 0);
    }

    /// Blocks the publish task for `work` on every frame, like a slow encoder.
    struct SlowSink {
        work: Duration,
    }

    impl FrameSink for SlowSink {
        fn submit(&mut self, _frame: Frame) -> Result<(), SinkError> {
            std::thread::sleep(self.work);
            Ok(())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Publish cycles completed in one second of real time at 30 fps, with a
    /// frame available on every cycle.
    async fn cycles_per_second(work: Duration) -> u64 {
        let buffer = Arc::new(PacingBuffer::new(3).unwrap());
        let (_fps_tx, fps_rx) = watch::channel(Some(30.0));
        let shutdown = Shutdown::new();

        let feeder = {
            let buffer = Arc::clone(&buffer);
            let listener = shutdown.listener();
            tokio::spawn(async move {
                let mut seq = 0;
                while !listener.is_triggered() {
                    seq += 1;
                    buffer.push(frame(seq));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let driver = PublishDriver::new(Arc::clone(&buffer), SlowSink { work }, fps_rx, shutdown.listener());
        let stopper = tokio::spawn(stop_after(shutdown, Duration::from_secs(1)));
        let report = driver.run().await;
        stopper.await.unwrap();
        feeder.await.unwrap();
        report.cycles
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sleep_absorbs_processing_time() {
        // 5ms of work leaves ~28.3ms of sleep, so the cadence stays at 30/s
        let cycles = cycles_per_second(Duration::from_millis(5)).await;
        assert!((27..=31).contains(&cycles), "cycles = {}", cycles);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overrun_skips_sleep() {
        // 40ms of work is past the 33.3ms interval: no sleep, one cycle per 40ms
        let cycles = cycles_per_second(Duration::from_millis(40)).await;
        assert!((21..=26).contains(&cycles), "cycles = {}", cycles);
    }

    struct LogSinkForTest;

    impl FrameSink for LogSinkForTest {
        fn submit(&mut self, _frame: Frame) -> Result<(), SinkError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "test"
        }
    }
}
