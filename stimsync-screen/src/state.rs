use serde::Serialize;
use serde_json::{Map, Value};
use stimsync_core::{
    Command, ConfigurationError, Stimulus, StimulusFrame, StimulusProgram, SyncSquareSample,
    SyncTrace,
};
use stimsync_timing::{Clock, FrameProfiler, FrameSummary, SystemClock};
use tracing::{debug, info, warn};

use crate::closed_loop::ClosedLoopHandle;
use crate::command::{CommandError, ScreenCommand};
use crate::config::ScreenConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PlaybackPhase {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// Animation clock bookkeeping.
///
/// While running, playback time is `accumulated + (now - epoch)`; otherwise
/// it is `accumulated`. `epoch` is only set while running.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub epoch: Option<f64>,
    pub accumulated: f64,
}

impl PlaybackState {
    /// Starts from zero, or resumes when paused.
    pub fn start(&mut self, t: f64) {
        if self.phase != PlaybackPhase::Paused {
            self.accumulated = 0.0;
        }
        self.epoch = Some(t);
        self.phase = PlaybackPhase::Running;
    }

    /// Returns false if the animation was not running.
    pub fn pause(&mut self, t: f64) -> bool {
        if self.phase != PlaybackPhase::Running {
            return false;
        }
        if let Some(epoch) = self.epoch.take() {
            self.accumulated += (t - epoch).max(0.0);
        }
        self.phase = PlaybackPhase::Paused;
        true
    }

    pub fn stop(&mut self) {
        *self = Self::default();
    }
}

pub fn playback_time(now: f64, state: &PlaybackState) -> f64 {
    match state.phase {
        PlaybackPhase::Running => {
            state.accumulated + state.epoch.map_or(0.0, |epoch| (now - epoch).max(0.0))
        }
        PlaybackPhase::Paused | PlaybackPhase::Stopped => state.accumulated,
    }
}

/// The sync patch the tracker camera watches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CornerSquare {
    pub color: f64,
    pub visible: bool,
    pub toggle: bool,
}

impl CornerSquare {
    fn advance(&mut self) {
        if self.toggle {
            self.color = if self.color >= 0.5 { 0.0 } else { 1.0 };
        }
    }

    /// Brightness the tracker sees; a hidden square reads as dark.
    pub fn sample_state(&self) -> f64 {
        if self.visible { self.color } else { 0.0 }
    }
}

/// Everything a renderer needs to paint one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub wall_time: f64,
    pub playback_time: f64,
    pub phase: PlaybackPhase,
    /// Set when no stimulus is loaded.
    pub idle_background: Option<f64>,
    pub stimuli: Vec<StimulusFrame>,
    pub corner_square: CornerSquare,
}

/// Per-screen animation state: loaded programs, playback clock, corner square,
/// closed-loop offset and profiling.
#[derive(Debug)]
pub struct ScreenRuntime<S: Stimulus = StimulusProgram, C: Clock = SystemClock> {
    name: String,
    clock: C,
    playback: PlaybackState,
    last_playback_time: Option<f64>,
    stimuli: Vec<S>,
    offset: ClosedLoopHandle,
    corner_square: CornerSquare,
    idle_background: f64,
    profiler: FrameProfiler,
    sync_trace: SyncTrace,
    quit_requested: bool,
}

impl<S: Stimulus, C: Clock> ScreenRuntime<S, C> {
    pub fn new(config: &ScreenConfig, clock: C) -> Self {
        Self {
            name: config.name.clone(),
            clock,
            playback: PlaybackState::default(),
            last_playback_time: None,
            stimuli: Vec::new(),
            offset: ClosedLoopHandle::new(),
            corner_square: CornerSquare {
                color: config.corner_square.color,
                visible: config.corner_square.visible,
                toggle: config.corner_square.toggle,
            },
            idle_background: config.idle_background,
            profiler: FrameProfiler::new(config.profile_max_samples),
            sync_trace: SyncTrace::default(),
            quit_requested: false,
        }
    }

    /// Configures a new program. On error nothing changes.
    pub fn load(
        &mut self,
        name: &str,
        hold: bool,
        config: &Map<String, Value>,
    ) -> Result<(), ConfigurationError> {
        let program = S::configure(name, config)?;
        if !hold {
            self.stimuli.clear();
        }
        debug!(screen = %self.name, stimulus = name, hold, "stimulus loaded");
        self.stimuli.push(program);
        Ok(())
    }

    pub fn start(&mut self, t: f64) {
        match self.playback.phase {
            PlaybackPhase::Paused => self.profiler.interrupt(),
            PlaybackPhase::Running | PlaybackPhase::Stopped => {
                self.profiler.begin(self.clock.now())
            }
        }
        self.last_playback_time = None;
        self.playback.start(t);
        debug!(screen = %self.name, t, "playback started");
    }

    pub fn pause(&mut self, t: f64) {
        if self.playback.pause(t) {
            self.last_playback_time = None;
            debug!(screen = %self.name, t, elapsed = self.playback.accumulated, "playback paused");
        }
    }

    /// Clears every program and returns the frame-rate summary of the run.
    pub fn stop(&mut self) -> Option<FrameSummary> {
        let summary = if self.stimuli.is_empty() {
            None
        } else {
            self.profiler.summary(self.clock.now())
        };
        if let Some(summary) = &summary {
            let names: Vec<&str> = self.stimuli.iter().map(Stimulus::name).collect();
            let percentiles: Vec<String> = summary
                .fps_percentiles
                .iter()
                .map(|(p, fps)| format!("p{p}={fps:.1}"))
                .collect();
            info!(
                screen = %self.name,
                stimuli = %names.join(", "),
                frames = summary.frames,
                duration = summary.duration,
                mean_fps = summary.intervals.effective_rate,
                frame_ms_mean = summary.intervals.mean * 1e3,
                frame_ms_std = summary.intervals.std * 1e3,
                fps = %percentiles.join(" "),
                "stimulus stopped"
            );
        }
        self.stimuli.clear();
        self.playback.stop();
        self.last_playback_time = None;
        self.profiler.reset();
        summary
    }

    /// Changes every program's rate at the playback instant matching `t`.
    pub fn update(&mut self, rate: f64, t: f64) {
        let at = playback_time(t, &self.playback);
        for stimulus in &mut self.stimuli {
            stimulus.update_rate(rate, at);
        }
    }

    pub fn execute(&mut self, command: ScreenCommand) -> Result<(), CommandError> {
        match command {
            ScreenCommand::LoadStim { name, hold, config } => self.load(&name, hold, &config)?,
            ScreenCommand::StartStim { t } => {
                let t = t.unwrap_or_else(|| self.clock.now());
                self.start(t);
            }
            ScreenCommand::PauseStim { t } => {
                let t = t.unwrap_or_else(|| self.clock.now());
                self.pause(t);
            }
            ScreenCommand::StopStim => {
                self.stop();
            }
            ScreenCommand::UpdateStim { rate, t } => {
                let t = t.unwrap_or_else(|| self.clock.now());
                self.update(rate, t);
            }
            ScreenCommand::StartCornerSquare => self.corner_square.toggle = true,
            ScreenCommand::StopCornerSquare => self.corner_square.toggle = false,
            ScreenCommand::WhiteCornerSquare => self.set_corner_square(1.0),
            ScreenCommand::BlackCornerSquare => self.set_corner_square(0.0),
            ScreenCommand::SetCornerSquare { color } => self.set_corner_square(color),
            ScreenCommand::ShowCornerSquare => self.corner_square.visible = true,
            ScreenCommand::HideCornerSquare => self.corner_square.visible = false,
            ScreenCommand::SetIdleBackground { color } => self.idle_background = color,
            ScreenCommand::SetGlobalFlyPos { x, y, z } => self.offset.set_position(x, y, z),
            ScreenCommand::SetGlobalThetaOffset { degrees } => {
                self.offset.set_theta_offset(degrees.to_radians())
            }
            ScreenCommand::Quit => self.quit_requested = true,
        }
        Ok(())
    }

    pub fn dispatch(&mut self, command: &Command) -> Result<(), CommandError> {
        let parsed = ScreenCommand::try_from(command)?;
        self.execute(parsed)
    }

    /// Applies a whole batch in order. Bad commands are logged and skipped.
    pub fn apply_batch(&mut self, batch: &[Command]) {
        for command in batch {
            if let Err(e) = self.dispatch(command) {
                warn!(screen = %self.name, command = %command.name, error = %e, "skipping command");
            }
        }
    }

    fn set_corner_square(&mut self, color: f64) {
        self.corner_square.toggle = false;
        self.corner_square.color = color;
    }

    /// Playback time never decreases within one running epoch; paused and
    /// stopped frames show exactly the accumulated time.
    pub fn tick(&mut self, now: f64) -> Frame {
        let mut t = playback_time(now, &self.playback);
        if self.playback.phase == PlaybackPhase::Running {
            if let Some(last) = self.last_playback_time {
                t = t.max(last);
            }
            self.last_playback_time = Some(t);
        }

        let offset = self.offset.snapshot();
        let stimuli: Vec<StimulusFrame> =
            self.stimuli.iter().map(|s| s.eval_at(t, &offset)).collect();
        let idle_background = stimuli.is_empty().then_some(self.idle_background);

        self.corner_square.advance();
        self.sync_trace.push(SyncSquareSample {
            timestamp: now,
            state: self.corner_square.sample_state(),
        });
        if self.playback.phase == PlaybackPhase::Running && !stimuli.is_empty() {
            self.profiler.record_frame(now);
        }

        Frame {
            wall_time: now,
            playback_time: t,
            phase: self.playback.phase,
            idle_background,
            stimuli,
            corner_square: self.corner_square,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn stimuli(&self) -> &[S] {
        &self.stimuli
    }

    pub fn corner_square(&self) -> &CornerSquare {
        &self.corner_square
    }

    /// Writer handle for the closed-loop offset.
    pub fn offset_handle(&self) -> ClosedLoopHandle {
        self.offset.clone()
    }

    pub fn sync_trace(&self) -> &SyncTrace {
        &self.sync_trace
    }

    pub fn take_sync_trace(&mut self) -> SyncTrace {
        std::mem::take(&mut self.sync_trace)
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stimsync_timing::ManualClock;

    fn runtime() -> ScreenRuntime<StimulusProgram, ManualClock> {
        ScreenRuntime::new(&ScreenConfig::default(), ManualClock::new(1000.0))
    }

    fn grating(rate: f64) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("rate".into(), rate.into());
        config
    }

    #[test]
    fn pause_resume_accumulates_running_time() {
        let mut state = PlaybackState::default();
        state.start(100.0);
        assert!(state.pause(105.0));
        state.start(110.0);
        assert_eq!(playback_time(112.0, &state), 7.0);

        assert_eq!(playback_time(90.0, &state), 5.0);
        assert!(state.pause(113.0));
        assert!(!state.pause(120.0));
        assert_eq!(playback_time(200.0, &state), 8.0);
    }

    #[test]
    fn paused_frame_shows_accumulated_time() {
        let mut rt = runtime();
        rt.load("SineGrating", false, &grating(10.0)).unwrap();
        rt.start(100.0);
        assert!((rt.tick(105.02).playback_time - 5.02).abs() < 1e-9);

        // pause stamped slightly before this screen's last frame
        rt.pause(105.0);
        assert_eq!(rt.playback().epoch, None);
        assert_eq!(rt.tick(105.03).playback_time, 5.0);
        assert_eq!(rt.tick(107.0).playback_time, 5.0);

        rt.start(110.0);
        assert!((rt.tick(110.01).playback_time - 5.01).abs() < 1e-9);
    }

    #[test]
    fn start_while_running_restarts() {
        let mut state = PlaybackState::default();
        state.start(0.0);
        state.start(10.0);
        assert_eq!(playback_time(12.0, &state), 2.0);
    }

    proptest! {
        #[test]
        fn accumulation_is_sum_of_running_spans(
            spans in proptest::collection::vec((0.0f64..5.0, 0.0f64..5.0), 1..12)
        ) {
            let mut state = PlaybackState::default();
            let mut now = 0.0;
            let mut expected = 0.0;
            for (i, (run, idle)) in spans.iter().enumerate() {
                state.start(now);
                now += run;
                expected += run;
                state.pause(now);
                if i % 2 == 0 {
                    // a stray pause while paused must not count anything
                    state.pause(now + idle);
                }
                now += idle;
            }
            prop_assert!((playback_time(now, &state) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn failed_load_leaves_program_set_unchanged() {
        let mut rt = runtime();
        rt.load("SineGrating", false, &grating(10.0)).unwrap();
        assert!(rt.load("Spiral", false, &Map::new()).is_err());
        assert!(rt.load("SineGrating", false, &grating(f64::NAN)).is_err());
        assert_eq!(rt.stimuli().len(), 1);

        rt.load("Checkerboard", true, &Map::new()).unwrap();
        assert_eq!(rt.stimuli().len(), 2);
        rt.load("Checkerboard", false, &Map::new()).unwrap();
        assert_eq!(rt.stimuli().len(), 1);
    }

    #[test]
    fn idle_frame_without_stimuli() {
        let mut rt = runtime();
        let frame = rt.tick(1000.0);
        assert_eq!(frame.idle_background, Some(0.5));
        assert!(frame.stimuli.is_empty());
        assert_eq!(frame.playback_time, 0.0);
    }

    #[test]
    fn batch_drives_playback_and_skips_bad_commands() {
        let mut rt = runtime();
        rt.apply_batch(&[
            Command::new("load_stim").with_kwarg("name", "SineGrating"),
            Command::new("no_such_command"),
            Command::new("start_stim").with_kwarg("t", 1000.0),
        ]);
        assert_eq!(rt.playback().phase, PlaybackPhase::Running);

        let frame = rt.tick(1002.0);
        assert_eq!(frame.idle_background, None);
        assert_eq!(frame.stimuli.len(), 1);
        assert_eq!(frame.playback_time, 2.0);

        // a late timestamp never moves playback backwards
        assert_eq!(rt.tick(1001.0).playback_time, 2.0);
    }

    #[test]
    fn stop_clears_and_reports_profile() {
        let mut rt = runtime();
        rt.load("ConstantBackground", false, &Map::new()).unwrap();
        rt.start(1000.0);
        for i in 0..10 {
            rt.tick(1000.0 + i as f64 * 0.01);
        }
        rt.clock().set(1000.1);
        let summary = rt.stop().unwrap();
        assert_eq!(summary.frames, 10);
        assert!((summary.intervals.effective_rate - 100.0).abs() < 1e-6);
        assert!(rt.stimuli().is_empty());
        assert_eq!(rt.playback().phase, PlaybackPhase::Stopped);
        assert!(rt.stop().is_none());
    }

    #[test]
    fn update_while_stopped_uses_time_zero() {
        let mut rt = runtime();
        rt.load("SineGrating", false, &grating(10.0)).unwrap();
        rt.update(40.0, 5000.0);
        let grating = rt.stimuli()[0].grating().unwrap();
        assert_eq!(grating.offset, 0.0);
        assert!((grating.rate - 40f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn corner_square_toggles_and_samples() {
        let mut rt = runtime();
        let first = rt.tick(1.0).corner_square.color;
        let second = rt.tick(2.0).corner_square.color;
        assert_ne!(first, second);

        rt.apply_batch(&[Command::new("white_corner_square")]);
        assert_eq!(rt.tick(3.0).corner_square.color, 1.0);
        assert_eq!(rt.tick(4.0).corner_square.color, 1.0);

        rt.apply_batch(&[Command::new("hide_corner_square")]);
        rt.tick(5.0);
        let trace = rt.take_sync_trace();
        assert_eq!(trace.timestamps, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(trace.states[2..], [1.0, 1.0, 0.0]);
        assert!(rt.sync_trace().is_empty());
    }

    #[test]
    fn theta_offset_command_is_in_degrees() {
        let mut rt = runtime();
        rt.apply_batch(&[
            Command::new("set_global_theta_offset").with_arg(90.0),
            Command::new("set_global_fly_pos").with_arg(1).with_arg(2).with_arg(3),
            Command::new("quit"),
        ]);
        let snapshot = rt.offset_handle().snapshot();
        assert!((snapshot.theta_offset - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(snapshot.position, [1.0, 2.0, 3.0]);
        assert!(rt.quit_requested());
    }
}
