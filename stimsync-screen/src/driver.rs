use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stimsync_core::{Stimulus, StimulusProgram};
use stimsync_timing::Clock;
use tracing::{debug, info, trace};

use crate::closed_loop::OffsetListener;
use crate::config::ScreenConfig;
use crate::error::{TraceError, TransportError};
use crate::state::{Frame, ScreenRuntime};
use crate::transport::{CommandInbox, CommandSource};

/// Receives every frame the runtime produces. The renderer lives behind this.
pub trait FrameSink {
    fn present(&mut self, frame: &Frame);
}

impl<F: FnMut(&Frame)> FrameSink for F {
    fn present(&mut self, frame: &Frame) {
        self(frame)
    }
}

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &Frame) {}
}

/// Traces each frame and logs phase changes.
#[derive(Debug, Default)]
pub struct LogSink {
    last_phase: Option<crate::state::PlaybackPhase>,
}

impl FrameSink for LogSink {
    fn present(&mut self, frame: &Frame) {
        if self.last_phase != Some(frame.phase) {
            info!(phase = ?frame.phase, stimuli = frame.stimuli.len(), "playback phase");
            self.last_phase = Some(frame.phase);
        }
        trace!(
            wall_time = frame.wall_time,
            playback_time = frame.playback_time,
            square = frame.corner_square.color,
            "frame"
        );
    }
}

/// Render loop of one screen: drain commands, tick, present, pace.
pub struct ScreenDriver<Src, K, S = StimulusProgram, C = stimsync_timing::SystemClock>
where
    Src: CommandSource,
    K: FrameSink,
    S: Stimulus,
    C: Clock,
{
    runtime: ScreenRuntime<S, C>,
    source: Src,
    sink: K,
    frame_period: Duration,
    sync_trace_path: Option<PathBuf>,
    offset_listener: Option<OffsetListener>,
}

impl<K: FrameSink, C: Clock> ScreenDriver<CommandInbox, K, StimulusProgram, C> {
    /// Binds the command inbox and, if configured, the offset listener.
    pub fn bind(config: &ScreenConfig, clock: C, sink: K) -> Result<Self, TransportError> {
        let runtime = ScreenRuntime::new(config, clock);
        let inbox = CommandInbox::bind(&config.command_addr)?;
        let mut driver = Self::new(config, runtime, inbox, sink);
        if let Some(addr) = &config.offset_addr {
            let listener = OffsetListener::bind(addr, driver.runtime.offset_handle())?;
            driver = driver.with_offset_listener(listener);
        }
        Ok(driver)
    }
}

impl<Src, K, S, C> ScreenDriver<Src, K, S, C>
where
    Src: CommandSource,
    K: FrameSink,
    S: Stimulus,
    C: Clock,
{
    pub fn new(config: &ScreenConfig, runtime: ScreenRuntime<S, C>, source: Src, sink: K) -> Self {
        Self {
            runtime,
            source,
            sink,
            frame_period: config.frame_period(),
            sync_trace_path: config.sync_trace_path.clone(),
            offset_listener: None,
        }
    }

    /// Keeps the listener alive for as long as the driver runs.
    pub fn with_offset_listener(mut self, listener: OffsetListener) -> Self {
        self.offset_listener = Some(listener);
        self
    }

    pub fn runtime(&self) -> &ScreenRuntime<S, C> {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut ScreenRuntime<S, C> {
        &mut self.runtime
    }

    pub fn source(&self) -> &Src {
        &self.source
    }

    pub fn offset_listener(&self) -> Option<&OffsetListener> {
        self.offset_listener.as_ref()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// One refresh. Batches are applied whole before the frame is computed.
    pub fn step(&mut self) {
        for batch in self.source.drain() {
            debug!(screen = %self.runtime.name(), batch_len = batch.len(), "applying batch");
            self.runtime.apply_batch(&batch);
        }
        let now = self.runtime.clock().now();
        let frame = self.runtime.tick(now);
        self.sink.present(&frame);
    }

    /// Steps at the configured rate until `shutdown` is set or a `quit`
    /// command arrives, then writes the sync trace.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<Option<PathBuf>, TraceError> {
        info!(screen = %self.runtime.name(), period_ms = self.frame_period.as_secs_f64() * 1e3, "render loop started");
        while !shutdown.load(Ordering::Relaxed) && !self.runtime.quit_requested() {
            let started = self.runtime.clock().now();
            self.step();
            let elapsed = (self.runtime.clock().now() - started).max(0.0);
            if let Some(remaining) = self.frame_period.checked_sub(Duration::from_secs_f64(elapsed))
            {
                self.runtime.clock().sleep(remaining);
            }
        }
        if self.runtime.playback().phase != crate::state::PlaybackPhase::Stopped {
            self.runtime.stop();
        }
        info!(screen = %self.runtime.name(), "render loop finished");
        self.save_sync_trace()
    }

    /// Writes the recorded corner-square trace as JSON, if a path is set.
    pub fn save_sync_trace(&mut self) -> Result<Option<PathBuf>, TraceError> {
        let Some(path) = self.sync_trace_path.clone() else {
            return Ok(None);
        };
        let trace = self.runtime.take_sync_trace();
        let json = serde_json::to_vec(&trace)?;
        fs::write(&path, json).map_err(|source| TraceError::Io {
            path: path.clone(),
            source,
        })?;
        info!(screen = %self.runtime.name(), path = %path.display(), samples = trace.len(), "sync trace saved");
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use stimsync_core::{Command, SyncTrace};
    use stimsync_timing::ManualClock;

    #[test]
    fn run_paces_frames_and_stops_on_quit() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScreenConfig {
            target_fps: 100.0,
            sync_trace_path: Some(dir.path().join("display.json")),
            ..ScreenConfig::default()
        };
        let clock = ManualClock::new(50.0);
        let runtime: ScreenRuntime<StimulusProgram, ManualClock> =
            ScreenRuntime::new(&config, clock.clone());
        let (tx, rx) = channel::unbounded();
        tx.send(vec![
            Command::new("load_stim").with_kwarg("name", "SineGrating"),
            Command::new("start_stim").with_kwarg("t", 50.0),
        ])
        .unwrap();

        let mut frames = Vec::new();
        {
            let sink = |frame: &Frame| {
                frames.push(frame.playback_time);
                if frames.len() == 5 {
                    tx.send(vec![Command::new("quit")]).unwrap();
                }
            };
            let mut driver = ScreenDriver::new(&config, runtime, rx, sink);
            let shutdown = AtomicBool::new(false);
            let saved = driver.run(&shutdown).unwrap();
            assert_eq!(saved, Some(dir.path().join("display.json")));
            assert!(driver.runtime().stimuli().is_empty());
        }

        assert_eq!(frames.len(), 6);
        for (i, t) in frames.iter().enumerate() {
            assert!((t - i as f64 * 0.01).abs() < 1e-9, "frame {i} at {t}");
        }

        let written: SyncTrace =
            serde_json::from_slice(&fs::read(dir.path().join("display.json")).unwrap()).unwrap();
        assert_eq!(written.len(), 6);
        assert!((clock.now() - 50.06).abs() < 1e-9);
    }

    #[test]
    fn shutdown_flag_stops_before_any_frame() {
        let config = ScreenConfig::default();
        let runtime: ScreenRuntime<StimulusProgram, ManualClock> =
            ScreenRuntime::new(&config, ManualClock::new(0.0));
        let (_tx, rx) = channel::unbounded::<Vec<Command>>();
        let mut driver = ScreenDriver::new(&config, runtime, rx, NullSink);
        let shutdown = AtomicBool::new(true);
        assert_eq!(driver.run(&shutdown).unwrap(), None);
        assert_eq!(driver.runtime().sync_trace().len(), 0);
    }
}
