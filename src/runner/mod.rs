//! Deferred-operation script runner.
//!
//! Scripts execute to completion as soon as they are run, but every call
//! they make is only *recorded* as a [`ScriptOp`]. The host then calls
//! [`ScriptRunner::tick`] once per frame and the queue drains in FIFO order,
//! stalling on idle counters, pauses (captures in flight) and asset waits.
//!
//! ```text
//! run_script ──▶ engine ──▶ ScriptApi ──▶ queue ──▶ tick ──▶ host / reporter
//! ```

mod api;
mod ops;

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

pub use ops::{PendingCapture, RunState, ScriptOp, TestSuiteRunConfig};

use crate::bridge::ScriptEngine;
use crate::config::{Config, DEFAULT_PAUSE_TIMEOUT, DEFAULT_SCRIPTS_DIR, SAMPLE_WARMUP_FRAMES};
use crate::engine::LuaScriptEngine;
use crate::host::{
    AssetTracker, AutomationHost, CameraChannels, CameraControllerKind, CaptureNotification,
    CaptureRequest, CaptureTicket, DirectoryScriptLoader, FrameCaptureResult, ManualAssetTracker,
    ScriptLoader,
};
use crate::paths::{is_file_under_folder, PathResolver, ScreenshotPaths};
use crate::report::ScriptReporter;
use crate::tolerance::{ToleranceCatalog, ToleranceOptions, ToleranceResult};

/// Invalidation message for a user-requested abort
pub const MANUAL_ABORT_MESSAGE: &str = "Script(s) manually aborted.";

/// Invalidation message when captures are impossible on an HDR swapchain
pub const HDR_ABORT_MESSAGE: &str = "Script(s) aborted due to HDR configuration.";

/// Console variable that pins the simulated frame time
const FRAME_TIME_OVERRIDE_CVAR: &str = "t_frameTimeOverride";

/// Swapchain format reported by captures on HDR displays
const HDR_SWAPCHAIN_FORMAT: &str = "R10G10B10A2_UNORM";

/// Drives queued script operations against an [`AutomationHost`]
pub struct ScriptRunner<H: AutomationHost> {
    host: H,
    engine: Arc<dyn ScriptEngine>,
    loader: Box<dyn ScriptLoader>,
    assets: Box<dyn AssetTracker>,
    reporter: ScriptReporter,
    tolerance: ToleranceOptions,
    resolver: PathResolver,

    queue: VecDeque<ScriptOp>,
    /// Identities of scripts whose bodies are executing right now
    executing: HashSet<String>,
    state: RunState,
    next_ticket: u64,
    executed_ops: u64,

    saved_viewport: Option<(u32, u32)>,
    show_imgui: bool,
    prev_show_imgui: bool,

    suite: TestSuiteRunConfig,
    default_pause_timeout: f32,
}

impl<H: AutomationHost> ScriptRunner<H> {
    /// Runner with the built-in engine, an empty directory loader rooted at
    /// the default scripts folder and a [`ManualAssetTracker`]
    pub fn new(host: H, reporter: ScriptReporter, tolerance: ToleranceOptions) -> Self {
        let resolver = reporter.paths().resolver().clone();
        Self {
            host,
            engine: Arc::new(LuaScriptEngine::new()),
            loader: Box::new(DirectoryScriptLoader::new(resolver.clone(), DEFAULT_SCRIPTS_DIR)),
            assets: Box::new(ManualAssetTracker::new()),
            reporter,
            tolerance,
            resolver,
            queue: VecDeque::new(),
            executing: HashSet::new(),
            state: RunState::default(),
            next_ticket: 0,
            executed_ops: 0,
            saved_viewport: None,
            show_imgui: true,
            prev_show_imgui: true,
            suite: TestSuiteRunConfig::default(),
            default_pause_timeout: DEFAULT_PAUSE_TIMEOUT,
        }
    }

    /// Runner wired from configuration: tolerance catalog, alias roots,
    /// scripts folder and pause timeout
    pub fn from_config(host: H, config: &Config) -> ToleranceResult<Self> {
        let catalog = ToleranceCatalog::load(&config.paths.tolerance_config)?;
        let resolver = PathResolver::from_config(config);
        let paths = ScreenshotPaths::new(resolver.clone(), host.render_api_name());
        let loader = DirectoryScriptLoader::new(resolver, config.paths.scripts_dir.clone());
        Ok(Self::new(host, ScriptReporter::new(paths), ToleranceOptions::new(catalog))
            .with_loader(Box::new(loader))
            .with_pause_timeout(config.runner.pause_timeout))
    }

    pub fn with_engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_loader(mut self, loader: Box<dyn ScriptLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_asset_tracker(mut self, assets: Box<dyn AssetTracker>) -> Self {
        self.assets = assets;
        self
    }

    /// Timeout used by captures that pause the script
    pub fn with_pause_timeout(mut self, seconds: f32) -> Self {
        self.default_pause_timeout = seconds;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn reporter(&self) -> &ScriptReporter {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut ScriptReporter {
        &mut self.reporter
    }

    /// Keep the results once the runner is done
    pub fn into_reporter(self) -> ScriptReporter {
        self.reporter
    }

    pub fn tolerance(&self) -> &ToleranceOptions {
        &self.tolerance
    }

    pub fn tolerance_mut(&mut self) -> &mut ToleranceOptions {
        &mut self.tolerance
    }

    pub fn run_state(&self) -> &RunState {
        &self.state
    }

    pub fn suite_config(&self) -> &TestSuiteRunConfig {
        &self.suite
    }

    pub fn queued_operations(&self) -> impl Iterator<Item = &ScriptOp> {
        self.queue.iter()
    }

    pub fn queued_operation_count(&self) -> usize {
        self.queue.len()
    }

    /// Operations executed since the runner was created
    pub fn executed_operation_count(&self) -> u64 {
        self.executed_ops
    }

    /// Script bodies currently on the execution stack
    pub fn executing_script_count(&self) -> usize {
        self.executing.len()
    }

    /// True while operations remain, cleanup is outstanding or an automated
    /// run is armed but not yet started
    pub fn is_running(&self) -> bool {
        !self.queue.is_empty()
            || self.state.do_final_cleanup
            || self.state.should_pop_script
            || (self.suite.automated_run_enabled && !self.suite.is_started)
    }

    pub fn is_idle(&self) -> bool {
        !self.is_running()
    }

    // ========================================================================
    // Running scripts
    // ========================================================================

    /// Start a fresh top-level run: reset the report, snapshot the viewport
    /// and execute `path`
    pub fn prepare_and_execute_script(&mut self, path: &str) {
        if !self.queue.is_empty() {
            warn!(target: "automation", script = path, "a script run is already in progress");
            return;
        }

        self.report_scriptable_action(&format!("RunScript('{path}')"));

        let (width, height) = self.host.viewport_size();
        if width == 0 || height == 0 {
            error!(target: "automation", "could not get current viewport size");
            self.saved_viewport = None;
        } else {
            self.saved_viewport = Some((width, height));
        }

        self.reporter.reset();
        self.reporter
            .set_available_tolerance_levels(self.tolerance.available_levels());

        let invalidation = if self.tolerance.is_level_adjusted() {
            "Results are invalid because the tolerance level has been adjusted."
        } else if !self.tolerance.is_script_controlled() {
            "Results are invalid because the tolerance level has been overridden."
        } else {
            ""
        };
        self.reporter.set_invalidation_message(invalidation);

        self.execute_script(path);
    }

    /// Run a script body now, bracketing its operations with report
    /// push/pop. Nested calls land here too.
    pub fn execute_script(&mut self, path: &str) {
        let script = match self.loader.load(path) {
            Ok(script) => script,
            Err(err) => {
                debug!(target: "automation", error = %err, "script load failed");
                self.queue.push_back(ScriptOp::Error(format!(
                    "Could not find or load script asset '{path}'."
                )));
                return;
            }
        };

        if self.executing.contains(&script.identity) {
            self.queue.push_back(ScriptOp::Error(format!(
                "Calling script '{path}' would likely cause an infinite loop and crash. Skipping."
            )));
            return;
        }

        if self.tolerance.is_script_controlled() {
            self.tolerance.clear_selection();
        }

        self.queue.push_back(ScriptOp::PushScript(path.to_string()));
        self.queue.push_back(ScriptOp::Log(format!("Running script '{path}'...")));

        self.executing.insert(script.identity.clone());
        let engine = Arc::clone(&self.engine);
        if let Err(err) = engine.execute(&script.source, path, self) {
            error!(target: "automation", script = path, error = %err, "script execution failed");
            self.queue.push_back(ScriptOp::Error(err.to_string()));
            self.queue.push_back(ScriptOp::Error(format!("Error running script '{path}'.")));
        }
        self.executing.remove(&script.identity);

        self.queue.push_back(ScriptOp::MarkScriptFinished);
    }

    /// Arm an automated full-suite run; it starts on the next tick
    pub fn run_main_test_suite(&mut self, suite_path: &str, exit_on_finish: bool, random_seed: i32) {
        self.suite = TestSuiteRunConfig {
            automated_run_enabled: true,
            is_started: false,
            close_on_finish: exit_on_finish,
            suite_path: suite_path.to_string(),
            random_seed,
        };
        info!(target: "automation", suite = suite_path, exit_on_finish, random_seed, "automated run armed");
    }

    /// Drop everything queued and mark results invalid with `reason`
    pub fn abort_scripts(&mut self, reason: &str) {
        info!(target: "automation", reason, "aborting scripts");
        self.reporter.set_invalidation_message(reason);

        self.queue.clear();
        self.executing.clear();

        self.state.paused = false;
        self.state.idle_frames = 0;
        self.state.idle_seconds = 0.0;
        self.state.waiting_for_assets = false;
        self.state.should_pop_script = false;

        while self.reporter.has_active_script() {
            self.reporter.pop_script();
        }

        // any completion for the old ticket is now stale
        self.state.pending_capture = None;
        self.state.do_final_cleanup = true;
    }

    pub fn abort_manually(&mut self) {
        self.abort_scripts(MANUAL_ABORT_MESSAGE);
    }

    /// Pause with the default timeout
    pub fn pause_script(&mut self) {
        self.pause_script_with_timeout(self.default_pause_timeout);
    }

    /// Pause; an already running timeout is only ever extended
    pub fn pause_script_with_timeout(&mut self, timeout: f32) {
        self.state.paused = true;
        self.state.pause_timeout = self.state.pause_timeout.max(timeout);
    }

    pub fn resume_script(&mut self) {
        if !self.state.paused {
            self.reporter.warning("Script is not paused");
        }
        self.state.paused = false;
    }

    /// Log a command that would reproduce a user action in a script
    pub fn report_scriptable_action(&self, command: &str) {
        info!(target: "automation", "Scriptable Action: {}", command);
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Advance one frame. `delta` is the frame time in seconds.
    pub fn tick(&mut self, delta: f32) {
        for notification in self.host.take_notifications() {
            self.on_capture_finished(notification);
        }

        if self.suite.automated_run_enabled && !self.suite.is_started {
            self.suite.is_started = true;
            let path = self.suite.suite_path.clone();
            self.prepare_and_execute_script(&path);
        }

        if self.state.should_pop_script {
            self.reporter.pop_script();
            self.state.should_pop_script = false;
        }

        loop {
            if self.state.should_pop_script {
                break;
            }

            if self.state.paused {
                self.state.pause_timeout -= delta;
                if self.state.pause_timeout < 0.0 {
                    self.reporter.error("Script pause timed out. Continuing...");
                    self.state.paused = false;
                    self.state.pending_capture = None;
                } else {
                    break;
                }
            }

            if self.state.waiting_for_assets {
                self.state.asset_tracking_timeout -= delta;
                if self.state.asset_tracking_timeout < 0.0 {
                    self.reporter.error("Script asset tracking timed out. Continuing...");
                    self.state.waiting_for_assets = false;
                } else if self.assets.did_expected_assets_finish() {
                    self.state.waiting_for_assets = false;
                } else {
                    break;
                }
            }

            if self.queue.is_empty() {
                break;
            }

            if self.state.idle_frames > 0 {
                self.state.idle_frames -= 1;
                break;
            }

            if self.state.idle_seconds > 0.0 {
                self.state.idle_seconds -= delta;
                break;
            }

            let Some(op) = self.queue.pop_front() else {
                break;
            };
            self.execute_op(op);

            if self.queue.is_empty() {
                self.state.do_final_cleanup = true;
            }
        }

        if self.state.should_pop_script {
            return;
        }

        if self.state.do_final_cleanup
            && !self.host.is_frame_capture_pending()
            && self.state.pending_capture.is_none()
        {
            self.final_cleanup();
        }
    }

    fn final_cleanup(&mut self) {
        self.assets.stop();

        if self.state.frame_time_locked {
            self.host
                .execute_console_command(&format!("{FRAME_TIME_OVERRIDE_CVAR} 0"));
            self.state.frame_time_locked = false;
        }

        if let Some((width, height)) = self.saved_viewport.take() {
            if self.host.viewport_size() != (width, height) && self.host.supports_viewport_resize() {
                self.host.resize_viewport(width, height);
            }
        }

        self.apply_show_imgui(true);

        self.reporter.sort_reports();
        self.reporter.open_report_dialog();

        self.state = RunState::default();

        let totals = self.reporter.totals();
        info!(
            target: "automation",
            scripts = totals.scripts,
            errors = totals.errors,
            screenshot_failures = totals.screenshot_failures,
            "script run finished"
        );

        if self.suite.automated_run_enabled && self.suite.close_on_finish {
            self.suite.automated_run_enabled = false;

            if self.reporter.has_errors_asserts_in_report() {
                self.host.set_exit_code(1);
                let mut failed = 0;
                for report in self.reporter.failed_script_reports() {
                    failed += 1;
                    error!(
                        target: "automation",
                        "Test failure {}: asserts {}, general errors {}, screenshot failures {}",
                        report.script_path,
                        report.assert_count,
                        report.general_error_count,
                        report.screenshot_error_count
                    );
                }
                error!(target: "automation", "{} tests failed", failed);
            }

            self.host.request_exit();
        }
    }

    fn on_capture_finished(&mut self, notification: CaptureNotification) {
        let pending = match self.state.pending_capture {
            Some(pending) if pending.ticket == notification.ticket => pending,
            _ => {
                debug!(target: "automation", ticket = notification.ticket.0, "ignoring stale capture completion");
                return;
            }
        };

        self.state.pending_capture = None;
        self.resume_script();

        if notification.result == FrameCaptureResult::Success {
            return;
        }

        if pending.frame
            && notification.result == FrameCaptureResult::UnsupportedFormat
            && notification.info.contains(HDR_SWAPCHAIN_FORMAT)
        {
            error!(
                target: "automation",
                "Screen capture testing is not supported in HDR. Disable the HDR display feature to run scripts."
            );
            self.abort_scripts(HDR_ABORT_MESSAGE);
            return;
        }

        warn!(
            target: "automation",
            result = ?notification.result,
            info = %notification.info,
            "capture did not complete"
        );
    }

    // ========================================================================
    // Operations
    // ========================================================================

    fn execute_op(&mut self, op: ScriptOp) {
        debug!(target: "automation", op = op.name(), "executing");
        self.executed_ops += 1;

        match op {
            ScriptOp::PushScript(path) => self.reporter.push_script(path),
            ScriptOp::Log(message) => info!(target: "automation", "{}", message),
            ScriptOp::MarkScriptFinished => self.state.should_pop_script = true,

            ScriptOp::Print(message) => info!(target: "automation", "Script: {}", message),
            ScriptOp::Error(message) => self.reporter.report_script_error(&message),
            ScriptOp::Warning(message) => self.reporter.report_script_warning(&message),

            ScriptOp::IdleFrames(frames) => self.state.idle_frames = frames,
            ScriptOp::IdleSeconds(seconds) => self.state.idle_seconds = seconds,
            ScriptOp::LockFrameTime(seconds) => {
                self.host
                    .execute_console_command(&format!("{FRAME_TIME_OVERRIDE_CVAR} {seconds:.6}"));
                self.state.frame_time_locked = true;
            }
            ScriptOp::UnlockFrameTime => {
                self.host
                    .execute_console_command(&format!("{FRAME_TIME_OVERRIDE_CVAR} 0"));
                self.state.frame_time_locked = false;
            }
            ScriptOp::ResizeViewport { width, height } => {
                if self.host.supports_viewport_resize() {
                    self.host.resize_viewport(width, height);
                } else {
                    self.reporter
                        .report_script_error("ResizeViewport() is not supported on this platform");
                }
            }
            ScriptOp::SetShowImGui(show) => self.apply_show_imgui(show),
            ScriptOp::RestoreShowImGui => self.apply_show_imgui(self.prev_show_imgui),
            ScriptOp::ExecuteConsoleCommand(command) => self.host.execute_console_command(&command),

            ScriptOp::OpenSample(name) => {
                if name.is_empty() {
                    self.host.reset_sample();
                } else if self.host.open_sample(&name) {
                    self.state.idle_frames = SAMPLE_WARMUP_FRAMES;
                } else {
                    self.reporter
                        .report_script_error(&format!("Could not find sample '{name}'."));
                }
            }
            ScriptOp::SetImguiValue { field, value } => self.host.set_imgui_value(&field, value),
            ScriptOp::ShowTool { name, enable } => {
                if !self.host.show_tool(&name, enable) {
                    self.reporter.warning(&format!("Can't find [{name}] tool"));
                }
            }

            ScriptOp::SelectToleranceLevel(name) => {
                if let Err(err) = self.tolerance.select_tolerance_level(&name, true) {
                    self.reporter.report_script_error(&err.to_string());
                }
            }
            ScriptOp::Capture(request) => self.start_capture(request),
            ScriptOp::CheckLatestScreenshot => {
                let level = self.tolerance.current_level().cloned();
                self.reporter.check_latest_screenshot(level.as_ref());
            }

            ScriptOp::Camera(command) => {
                let kind = command.controller();
                if !self.host.has_camera_controller(kind) {
                    self.reporter.report_script_error(&format!(
                        "There is no {} camera controller for the camera entity.",
                        kind.name()
                    ));
                }
                self.host.apply_camera_command(&command);
            }

            ScriptOp::AssetTrackingStart => self.assets.start(),
            ScriptOp::AssetTrackingExpectAsset { path, expected_count } => {
                self.assets.expect_asset(&path, expected_count);
            }
            ScriptOp::AssetTrackingIdleUntilFinished { timeout } => {
                self.state.waiting_for_assets = true;
                self.state.asset_tracking_timeout = timeout;
            }
            ScriptOp::AssetTrackingStop => self.assets.stop(),
        }
    }

    fn apply_show_imgui(&mut self, show: bool) {
        self.prev_show_imgui = self.show_imgui;
        self.show_imgui = show;
        self.host.set_imgui_visible(show);
    }

    fn allocate_ticket(&mut self) -> CaptureTicket {
        self.next_ticket += 1;
        CaptureTicket(self.next_ticket)
    }

    /// Validate the target of a screenshot and register the test.
    ///
    /// Returns the resolved path, or None after reporting why the capture
    /// cannot happen.
    fn prepare_for_screen_capture(&mut self, path: &str) -> Option<String> {
        let resolved = self.resolver.resolve(path);
        let folder = self.reporter.paths().screenshots_folder(true);
        if !is_file_under_folder(&resolved, &folder) {
            let message = format!(
                "Screenshots must be captured under the '{}' folder. Attempted to save screenshot to '{}'.",
                self.reporter.paths().screenshots_folder(false),
                path
            );
            self.reporter.report_script_error(&message);
            return None;
        }

        if Path::new(&resolved).exists() && fs::remove_file(&resolved).is_err() {
            self.reporter
                .report_script_error(&format!("Failed to delete existing screenshot file '{path}'."));
            return None;
        }

        self.reporter.add_screenshot_test(resolved.clone());
        Some(resolved)
    }

    fn start_capture(&mut self, request: CaptureRequest) {
        let frame = request.is_frame_capture();
        let request = if frame {
            match self.prepare_for_screen_capture(request.output_path()) {
                Some(resolved) => request.with_output_path(resolved),
                None => return,
            }
        } else {
            let resolved = self.resolver.resolve(request.output_path());
            request.with_output_path(resolved)
        };

        let ticket = self.allocate_ticket();
        self.state.pending_capture = Some(PendingCapture { ticket, frame });
        self.pause_script();

        debug!(target: "automation", kind = request.kind_name(), path = request.output_path(), "capture requested");
        if let Err(err) = self.host.request_capture(&request, ticket) {
            self.reporter.report_script_error(&err.to_string());
            self.state.pending_capture = None;
            self.resume_script();
        }
    }

    // ========================================================================
    // Camera move reporting
    // ========================================================================

    /// A user finished moving the camera: emit script commands that would
    /// reproduce the affected `channels`
    pub fn on_camera_move_ended(&mut self, kind: CameraControllerKind, channels: CameraChannels) -> Vec<String> {
        let camera = self.host.camera_state();
        let mut actions = Vec::new();

        match kind {
            CameraControllerKind::ArcBall => {
                let state = camera.arc_ball;
                if channels.contains(CameraChannels::CENTER) {
                    let [x, y, z] = state.center;
                    actions.push(format!(
                        "ArcBallCameraController_SetCenter(Vector3({x:.6}, {y:.6}, {z:.6}))"
                    ));
                }
                if channels.contains(CameraChannels::PAN) {
                    let [x, y, z] = state.pan;
                    actions.push(format!(
                        "ArcBallCameraController_SetPan(Vector3({x:.6}, {y:.6}, {z:.6}))"
                    ));
                }
                if channels.contains(CameraChannels::HEADING) {
                    actions.push(format!(
                        "ArcBallCameraController_SetHeading(DegToRad({:.6}))",
                        state.heading.to_degrees()
                    ));
                }
                if channels.contains(CameraChannels::PITCH) {
                    actions.push(format!(
                        "ArcBallCameraController_SetPitch(DegToRad({:.6}))",
                        state.pitch.to_degrees()
                    ));
                }
                if channels.contains(CameraChannels::DISTANCE) {
                    actions.push(format!(
                        "ArcBallCameraController_SetDistance({:.6})",
                        state.distance
                    ));
                }
            }
            CameraControllerKind::NoClip => {
                let state = camera.no_clip;
                if channels.contains(CameraChannels::POSITION) {
                    let [x, y, z] = state.position;
                    actions.push(format!(
                        "NoClipCameraController_SetPosition(Vector3({x:.6}, {y:.6}, {z:.6}))"
                    ));
                }
                if channels.contains(CameraChannels::ORIENTATION) {
                    actions.push(format!(
                        "NoClipCameraController_SetHeading(DegToRad({:.6}))",
                        state.heading.to_degrees()
                    ));
                    actions.push(format!(
                        "NoClipCameraController_SetPitch(DegToRad({:.6}))",
                        state.pitch.to_degrees()
                    ));
                }
                if channels.contains(CameraChannels::FOV) {
                    actions.push(format!(
                        "NoClipCameraController_SetFov(DegToRad({:.6}))",
                        state.fov.to_degrees()
                    ));
                }
            }
        }

        for action in &actions {
            self.report_scriptable_action(action);
        }
        actions
    }
}
