//! Collaborator seams between the script runner and the application it drives.
//!
//! The runner never talks to a renderer, window or asset pipeline directly.
//! Everything it needs goes through these traits:
//! - `AutomationHost` - captures, console, viewport, ImGui, samples, camera, process exit
//! - `AssetTracker` - asset job completion used by `AssetTracking_*` operations
//! - `ScriptLoader` - turns a script path into source text and a stable identity
//!
//! `HeadlessHost`, `ManualAssetTracker` and `DirectoryScriptLoader` implement
//! them without any engine so that scripts can run in CI and in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compare::{CompareError, Framebuffer};
use crate::paths::{PathResolver, normalize_path};

/// Result type for host operations
pub type HostResult<T> = Result<T, HostError>;

/// Errors raised by host collaborators
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("capture request refused: {0}")]
    CaptureRefused(String),

    #[error("{0} is not supported by this host")]
    Unsupported(&'static str),

    #[error("Could not find or load script asset '{0}'.")]
    ScriptNotFound(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Image(#[from] CompareError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Captures
// ============================================================================

/// Identifies one capture request. Completions carrying any other ticket
/// than the one the runner is waiting for are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaptureTicket(pub u64);

/// Which side of a pass attachment to read back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadbackOption {
    Input,
    #[default]
    Output,
}

/// A capture the runner asks the host to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaptureRequest {
    Screenshot {
        path: String,
    },
    ScreenshotWithPreview {
        path: String,
    },
    PassAttachment {
        pass_hierarchy: Vec<String>,
        slot: String,
        path: String,
        readback: ReadbackOption,
    },
    PassTimestamp {
        path: String,
    },
    CpuFrameTime {
        path: String,
    },
    PassPipelineStatistics {
        path: String,
    },
    CpuProfilingStatistics {
        path: String,
    },
    BenchmarkMetadata {
        name: String,
        path: String,
    },
}

impl CaptureRequest {
    /// File the capture is written to
    pub fn output_path(&self) -> &str {
        match self {
            CaptureRequest::Screenshot { path }
            | CaptureRequest::ScreenshotWithPreview { path }
            | CaptureRequest::PassAttachment { path, .. }
            | CaptureRequest::PassTimestamp { path }
            | CaptureRequest::CpuFrameTime { path }
            | CaptureRequest::PassPipelineStatistics { path }
            | CaptureRequest::CpuProfilingStatistics { path }
            | CaptureRequest::BenchmarkMetadata { path, .. } => path,
        }
    }

    /// The same request writing to `path` instead
    pub fn with_output_path(mut self, new_path: String) -> Self {
        match &mut self {
            CaptureRequest::Screenshot { path }
            | CaptureRequest::ScreenshotWithPreview { path }
            | CaptureRequest::PassAttachment { path, .. }
            | CaptureRequest::PassTimestamp { path }
            | CaptureRequest::CpuFrameTime { path }
            | CaptureRequest::PassPipelineStatistics { path }
            | CaptureRequest::CpuProfilingStatistics { path }
            | CaptureRequest::BenchmarkMetadata { path, .. } => *path = new_path,
        }
        self
    }

    /// Image captures complete through the frame capture channel; the rest
    /// are profiling captures
    pub fn is_frame_capture(&self) -> bool {
        matches!(
            self,
            CaptureRequest::Screenshot { .. }
                | CaptureRequest::ScreenshotWithPreview { .. }
                | CaptureRequest::PassAttachment { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            CaptureRequest::Screenshot { .. } => "Screenshot",
            CaptureRequest::ScreenshotWithPreview { .. } => "ScreenshotWithPreview",
            CaptureRequest::PassAttachment { .. } => "PassAttachment",
            CaptureRequest::PassTimestamp { .. } => "PassTimestamp",
            CaptureRequest::CpuFrameTime { .. } => "CpuFrameTime",
            CaptureRequest::PassPipelineStatistics { .. } => "PassPipelineStatistics",
            CaptureRequest::CpuProfilingStatistics { .. } => "CpuProfilingStatistics",
            CaptureRequest::BenchmarkMetadata { .. } => "BenchmarkMetadata",
        }
    }
}

/// Outcome of a capture as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameCaptureResult {
    Success,
    FileWriteError,
    InvalidArgument,
    UnsupportedFormat,
    InternalError,
}

/// Completion of a capture request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureNotification {
    pub ticket: CaptureTicket,
    pub result: FrameCaptureResult,
    /// Free-form detail, e.g. the offending pixel format
    pub info: String,
}

// ============================================================================
// ImGui and camera values
// ============================================================================

/// A value a script can push into a named ImGui field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImguiValue {
    Bool(bool),
    Number(f32),
    String(String),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CameraControllerKind {
    ArcBall,
    NoClip,
}

impl CameraControllerKind {
    pub fn name(self) -> &'static str {
        match self {
            CameraControllerKind::ArcBall => "ArcBall",
            CameraControllerKind::NoClip => "NoClip",
        }
    }
}

/// Camera setter issued by a script. Angles are in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CameraCommand {
    ArcBallSetCenter([f32; 3]),
    ArcBallSetPan([f32; 3]),
    ArcBallSetDistance(f32),
    ArcBallSetHeading(f32),
    ArcBallSetPitch(f32),
    NoClipSetPosition([f32; 3]),
    NoClipSetHeading(f32),
    NoClipSetPitch(f32),
    NoClipSetFov(f32),
}

impl CameraCommand {
    pub fn controller(&self) -> CameraControllerKind {
        match self {
            CameraCommand::ArcBallSetCenter(_)
            | CameraCommand::ArcBallSetPan(_)
            | CameraCommand::ArcBallSetDistance(_)
            | CameraCommand::ArcBallSetHeading(_)
            | CameraCommand::ArcBallSetPitch(_) => CameraControllerKind::ArcBall,
            CameraCommand::NoClipSetPosition(_)
            | CameraCommand::NoClipSetHeading(_)
            | CameraCommand::NoClipSetPitch(_)
            | CameraCommand::NoClipSetFov(_) => CameraControllerKind::NoClip,
        }
    }
}

/// Channels reported when a user-driven camera move ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraChannels(pub u32);

impl CameraChannels {
    pub const CENTER: Self = Self(1 << 0);
    pub const PAN: Self = Self(1 << 1);
    pub const HEADING: Self = Self(1 << 2);
    pub const PITCH: Self = Self(1 << 3);
    pub const DISTANCE: Self = Self(1 << 4);
    pub const POSITION: Self = Self(1 << 5);
    pub const ORIENTATION: Self = Self(1 << 6);
    pub const FOV: Self = Self(1 << 7);
    pub const ALL: Self = Self(0xff);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CameraChannels {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ArcBallState {
    pub center: [f32; 3],
    pub pan: [f32; 3],
    pub distance: f32,
    pub heading: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NoClipState {
    pub position: [f32; 3],
    pub heading: f32,
    pub pitch: f32,
    pub fov: f32,
}

/// Current camera controller values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub arc_ball: ArcBallState,
    pub no_clip: NoClipState,
}

impl CameraState {
    pub fn apply(&mut self, command: &CameraCommand) {
        match *command {
            CameraCommand::ArcBallSetCenter(v) => self.arc_ball.center = v,
            CameraCommand::ArcBallSetPan(v) => self.arc_ball.pan = v,
            CameraCommand::ArcBallSetDistance(d) => self.arc_ball.distance = d,
            CameraCommand::ArcBallSetHeading(h) => self.arc_ball.heading = h,
            CameraCommand::ArcBallSetPitch(p) => self.arc_ball.pitch = p,
            CameraCommand::NoClipSetPosition(v) => self.no_clip.position = v,
            CameraCommand::NoClipSetHeading(h) => self.no_clip.heading = h,
            CameraCommand::NoClipSetPitch(p) => self.no_clip.pitch = p,
            CameraCommand::NoClipSetFov(f) => self.no_clip.fov = f,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// The application driven by the runner.
///
/// Captures are fire-and-forget: `request_capture` returns immediately and the
/// outcome arrives later through `take_notifications`, which the runner polls
/// at the start of every tick.
pub trait AutomationHost {
    fn request_capture(&mut self, request: &CaptureRequest, ticket: CaptureTicket) -> HostResult<()>;

    /// Drain completions that arrived since the last call
    fn take_notifications(&mut self) -> Vec<CaptureNotification>;

    /// True while the host still owes a frame capture
    fn is_frame_capture_pending(&self) -> bool;

    fn execute_console_command(&mut self, command: &str);

    fn viewport_size(&self) -> (u32, u32);
    fn supports_viewport_resize(&self) -> bool;
    fn resize_viewport(&mut self, width: u32, height: u32);

    fn set_imgui_visible(&mut self, visible: bool);
    fn set_imgui_value(&mut self, field: &str, value: ImguiValue);

    /// Returns false when no sample has that name
    fn open_sample(&mut self, name: &str) -> bool;
    fn reset_sample(&mut self);

    /// Returns false when no tool has that name
    fn show_tool(&mut self, name: &str, enable: bool) -> bool;

    fn has_camera_controller(&self, kind: CameraControllerKind) -> bool;
    fn apply_camera_command(&mut self, command: &CameraCommand);
    fn camera_state(&self) -> CameraState;

    fn render_api_name(&self) -> String;

    fn set_exit_code(&mut self, code: i32);
    fn request_exit(&mut self);
}

/// Tracks asset processing jobs a script waits on
pub trait AssetTracker {
    /// Begin tracking, forgetting anything collected before
    fn start(&mut self);

    /// Expect `count` more completed jobs for `path`; repeated calls add up
    fn expect_asset(&mut self, path: &str, count: u32);

    fn did_expected_assets_finish(&self) -> bool;

    /// Stop tracking, forgetting anything collected
    fn stop(&mut self);
}

/// A script's text and the identity used for reentrancy checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedScript {
    pub identity: String,
    pub source: String,
}

pub trait ScriptLoader {
    fn load(&self, path: &str) -> HostResult<LoadedScript>;
}

// ============================================================================
// Headless host
// ============================================================================

/// Default viewport of the headless host
pub const HEADLESS_VIEWPORT: (u32, u32) = (320, 180);

/// Tools the headless host knows how to show
pub const HEADLESS_TOOLS: [&str; 5] = [
    "PassTree",
    "CPU Profiler",
    "GPU Profiler",
    "File IO Profiler",
    "Transient Attachment Profiler",
];

/// An engine stand-in that renders captures in software
///
/// Screenshots are drawn into a `Framebuffer`: a background derived from the
/// open sample's name, the name itself as text, and an ImGui bar when ImGui is
/// visible. Profiling captures are written as JSON. Completions are queued and
/// handed out on the next `take_notifications` call.
#[derive(Debug)]
pub struct HeadlessHost {
    render_api: String,
    viewport: (u32, u32),
    supports_resize: bool,
    imgui_visible: bool,
    imgui_values: BTreeMap<String, ImguiValue>,
    /// Empty means every sample name is accepted
    samples: BTreeSet<String>,
    current_sample: Option<String>,
    tools: BTreeMap<String, bool>,
    camera_controllers: BTreeSet<CameraControllerKind>,
    camera: CameraState,
    console_history: Vec<String>,
    frame_time_override: Option<f32>,
    notifications: Vec<CaptureNotification>,
    held: Vec<CaptureNotification>,
    /// Frame captures whose completion has not been taken yet
    owed_frame_captures: BTreeSet<CaptureTicket>,
    hold_captures: bool,
    refuse_captures: bool,
    injected_failure: Option<(FrameCaptureResult, String)>,
    captured_files: Vec<PathBuf>,
    exit_code: Option<i32>,
    exit_requested: bool,
}

impl HeadlessHost {
    pub fn new(render_api: impl Into<String>) -> Self {
        Self {
            render_api: render_api.into(),
            viewport: HEADLESS_VIEWPORT,
            supports_resize: true,
            imgui_visible: true,
            imgui_values: BTreeMap::new(),
            samples: BTreeSet::new(),
            current_sample: None,
            tools: HEADLESS_TOOLS.iter().map(|t| (t.to_string(), false)).collect(),
            camera_controllers: [CameraControllerKind::ArcBall, CameraControllerKind::NoClip]
                .into_iter()
                .collect(),
            camera: CameraState::default(),
            console_history: Vec::new(),
            frame_time_override: None,
            notifications: Vec::new(),
            held: Vec::new(),
            owed_frame_captures: BTreeSet::new(),
            hold_captures: false,
            refuse_captures: false,
            injected_failure: None,
            captured_files: Vec::new(),
            exit_code: None,
            exit_requested: false,
        }
    }

    /// Set the initial viewport size
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    /// Restrict `open_sample` to these names
    pub fn with_samples(mut self, samples: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.samples = samples.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_viewport_resize(mut self, supported: bool) -> Self {
        self.supports_resize = supported;
        self
    }

    pub fn without_camera_controller(mut self, kind: CameraControllerKind) -> Self {
        self.camera_controllers.remove(&kind);
        self
    }

    /// Keep completions back until `release_captures`
    pub fn set_hold_captures(&mut self, hold: bool) {
        self.hold_captures = hold;
    }

    /// Deliver every held completion on the next poll
    pub fn release_captures(&mut self) {
        self.notifications.append(&mut self.held);
    }

    /// Make every following capture request fail synchronously
    pub fn set_refuse_captures(&mut self, refuse: bool) {
        self.refuse_captures = refuse;
    }

    /// Complete the next capture with `result` instead of writing a file
    pub fn inject_capture_failure(&mut self, result: FrameCaptureResult, info: impl Into<String>) {
        self.injected_failure = Some((result, info.into()));
    }

    pub fn imgui_visible(&self) -> bool {
        self.imgui_visible
    }

    pub fn imgui_value(&self, field: &str) -> Option<&ImguiValue> {
        self.imgui_values.get(field)
    }

    pub fn current_sample(&self) -> Option<&str> {
        self.current_sample.as_deref()
    }

    pub fn tool_visible(&self, name: &str) -> bool {
        self.tools.get(name).copied().unwrap_or(false)
    }

    pub fn console_history(&self) -> &[String] {
        &self.console_history
    }

    /// Frame time forced through `t_frameTimeOverride`, if any
    pub fn frame_time_override(&self) -> Option<f32> {
        self.frame_time_override
    }

    /// Every file written by a successful capture, in request order
    pub fn captured_files(&self) -> &[PathBuf] {
        &self.captured_files
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Draw what the viewport currently shows
    pub fn render_frame(&self) -> Framebuffer {
        let (width, height) = self.viewport;
        let label = self.current_sample.as_deref().unwrap_or("Home");
        let mut fb = Framebuffer::with_color(width, height, sample_color(label));
        fb.draw_text(8, height / 2, label, [255, 255, 255, 255], sample_color(label));
        if self.imgui_visible {
            fb.draw_rect(0, 0, width, 12, [40, 40, 48, 255]);
            fb.draw_text(2, 2, "ImGui", [230, 230, 230, 255], [40, 40, 48, 255]);
        }
        fb
    }

    fn perform_capture(&mut self, request: &CaptureRequest) -> HostResult<()> {
        let path = Path::new(request.output_path());
        match request {
            CaptureRequest::Screenshot { .. } | CaptureRequest::ScreenshotWithPreview { .. } => {
                self.render_frame().save_png(path)?;
            }
            CaptureRequest::PassAttachment { slot, pass_hierarchy, .. } => {
                let mut fb = self.render_frame();
                let label = format!("{}:{}", pass_hierarchy.join("/"), slot);
                fb.draw_text(8, 16, &label, [255, 255, 0, 255], [0, 0, 0, 255]);
                fb.save_png(path)?;
            }
            other => {
                let payload = self.profiling_payload(other);
                write_file(path, serde_json::to_string_pretty(&payload)?.as_bytes())?;
            }
        }
        self.captured_files.push(path.to_path_buf());
        Ok(())
    }

    fn profiling_payload(&self, request: &CaptureRequest) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "kind": request.kind_name(),
            "renderApi": self.render_api,
            "sample": self.current_sample,
        });
        if let CaptureRequest::BenchmarkMetadata { name, .. } = request {
            payload["benchmarkName"] = serde_json::Value::String(name.clone());
        }
        payload
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RENDER_API)
    }
}

impl AutomationHost for HeadlessHost {
    fn request_capture(&mut self, request: &CaptureRequest, ticket: CaptureTicket) -> HostResult<()> {
        if self.refuse_captures {
            return Err(HostError::CaptureRefused(format!(
                "{} capture to '{}'",
                request.kind_name(),
                request.output_path()
            )));
        }

        let notification = match self.injected_failure.take() {
            Some((result, info)) => CaptureNotification { ticket, result, info },
            None => match self.perform_capture(request) {
                Ok(()) => CaptureNotification {
                    ticket,
                    result: FrameCaptureResult::Success,
                    info: request.output_path().to_string(),
                },
                Err(err) => CaptureNotification {
                    ticket,
                    result: FrameCaptureResult::FileWriteError,
                    info: err.to_string(),
                },
            },
        };
        debug!(ticket = ticket.0, kind = request.kind_name(), result = ?notification.result, "capture queued");

        if request.is_frame_capture() {
            self.owed_frame_captures.insert(ticket);
        }
        if self.hold_captures {
            self.held.push(notification);
        } else {
            self.notifications.push(notification);
        }
        Ok(())
    }

    fn take_notifications(&mut self) -> Vec<CaptureNotification> {
        let delivered = std::mem::take(&mut self.notifications);
        for notification in &delivered {
            self.owed_frame_captures.remove(&notification.ticket);
        }
        delivered
    }

    fn is_frame_capture_pending(&self) -> bool {
        !self.owed_frame_captures.is_empty()
    }

    fn execute_console_command(&mut self, command: &str) {
        info!(command, "console command");
        let mut parts = command.split_whitespace();
        if parts.next() == Some("t_frameTimeOverride") {
            self.frame_time_override = parts
                .next()
                .and_then(|value| value.parse::<f32>().ok())
                .filter(|seconds| *seconds > 0.0);
        }
        self.console_history.push(command.to_string());
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }

    fn supports_viewport_resize(&self) -> bool {
        self.supports_resize
    }

    fn resize_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn set_imgui_visible(&mut self, visible: bool) {
        self.imgui_visible = visible;
    }

    fn set_imgui_value(&mut self, field: &str, value: ImguiValue) {
        self.imgui_values.insert(field.to_string(), value);
    }

    fn open_sample(&mut self, name: &str) -> bool {
        if !self.samples.is_empty() && !self.samples.contains(name) {
            return false;
        }
        self.current_sample = Some(name.to_string());
        self.imgui_values.clear();
        true
    }

    fn reset_sample(&mut self) {
        self.current_sample = None;
        self.imgui_values.clear();
    }

    fn show_tool(&mut self, name: &str, enable: bool) -> bool {
        match self.tools.get_mut(name) {
            Some(visible) => {
                *visible = enable;
                true
            }
            None => false,
        }
    }

    fn has_camera_controller(&self, kind: CameraControllerKind) -> bool {
        self.camera_controllers.contains(&kind)
    }

    fn apply_camera_command(&mut self, command: &CameraCommand) {
        if self.has_camera_controller(command.controller()) {
            self.camera.apply(command);
        }
    }

    fn camera_state(&self) -> CameraState {
        self.camera
    }

    fn render_api_name(&self) -> String {
        self.render_api.clone()
    }

    fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    fn request_exit(&mut self) {
        self.exit_requested = true;
    }
}

/// Deterministic background color for a sample
fn sample_color(name: &str) -> [u8; 4] {
    // FNV-1a
    let hash = name
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    let [r, g, b, _] = hash.to_le_bytes();
    [r / 2, g / 2, b / 2, 255]
}

fn write_file(path: &Path, bytes: &[u8]) -> HostResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| HostError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, bytes).map_err(|source| HostError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Asset tracking
// ============================================================================

#[derive(Debug, Default)]
struct TrackedAssets {
    tracking: bool,
    /// Normalized lowercase path -> (expected, completed)
    assets: BTreeMap<String, (u32, u32)>,
}

/// Asset tracker fed by explicit `complete_asset` calls.
///
/// Clones share state, so a test or a file watcher can keep a handle while the
/// runner owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualAssetTracker {
    state: Arc<Mutex<TrackedAssets>>,
}

impl ManualAssetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackedAssets> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one finished job for `path`. Ignored while not tracking.
    pub fn complete_asset(&self, path: &str) {
        let mut state = self.lock();
        if !state.tracking {
            return;
        }
        state.assets.entry(asset_key(path)).or_default().1 += 1;
    }

    pub fn is_tracking(&self) -> bool {
        self.lock().tracking
    }
}

impl AssetTracker for ManualAssetTracker {
    fn start(&mut self) {
        let mut state = self.lock();
        state.tracking = true;
        state.assets.clear();
    }

    fn expect_asset(&mut self, path: &str, count: u32) {
        self.lock().assets.entry(asset_key(path)).or_default().0 += count;
    }

    fn did_expected_assets_finish(&self) -> bool {
        self.lock()
            .assets
            .values()
            .all(|(expected, completed)| completed >= expected)
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.tracking = false;
        state.assets.clear();
    }
}

fn asset_key(path: &str) -> String {
    normalize_path(path).to_lowercase()
}

// ============================================================================
// Script loading
// ============================================================================

/// Loads scripts from disk.
///
/// A path is tried as given (after alias expansion) and then relative to the
/// scripts root.
#[derive(Debug, Clone)]
pub struct DirectoryScriptLoader {
    resolver: PathResolver,
    scripts_dir: PathBuf,
}

impl DirectoryScriptLoader {
    pub fn new(resolver: PathResolver, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            scripts_dir: scripts_dir.into(),
        }
    }

    fn candidates(&self, path: &str) -> Vec<PathBuf> {
        let resolved = self.resolver.resolve_path_buf(path);
        let mut candidates = vec![resolved.clone()];
        if resolved.is_relative() {
            candidates.push(self.scripts_dir.join(&resolved));
        }
        candidates
    }
}

impl ScriptLoader for DirectoryScriptLoader {
    fn load(&self, path: &str) -> HostResult<LoadedScript> {
        let found = self
            .candidates(path)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| HostError::ScriptNotFound(path.to_string()))?;

        let source = std::fs::read_to_string(&found).map_err(|source| HostError::Io {
            path: found.clone(),
            source,
        })?;
        Ok(LoadedScript {
            identity: normalize_path(&found.to_string_lossy()),
            source,
        })
    }
}

/// Scripts held in memory, keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct MemoryScriptLoader {
    scripts: BTreeMap<String, String>,
}

impl MemoryScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, path: &str, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&mut self, path: &str, source: impl Into<String>) {
        self.scripts.insert(normalize_path(path), source.into());
    }
}

impl ScriptLoader for MemoryScriptLoader {
    fn load(&self, path: &str) -> HostResult<LoadedScript> {
        let identity = normalize_path(path);
        self.scripts
            .get(&identity)
            .map(|source| LoadedScript {
                identity: identity.clone(),
                source: source.clone(),
            })
            .ok_or_else(|| HostError::ScriptNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::load_png;

    #[test]
    fn test_capture_completes_on_next_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots/a.png");
        let mut host = HeadlessHost::new("null").with_viewport(64, 32);
        host.open_sample("RHI/Triangle");

        let request = CaptureRequest::Screenshot {
            path: path.to_string_lossy().into_owned(),
        };
        host.request_capture(&request, CaptureTicket(7)).unwrap();
        assert!(host.is_frame_capture_pending());

        let notifications = host.take_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].ticket, CaptureTicket(7));
        assert_eq!(notifications[0].result, FrameCaptureResult::Success);
        assert!(!host.is_frame_capture_pending());

        let image = load_png(&path).unwrap();
        assert_eq!((image.width(), image.height()), (64, 32));
    }

    #[test]
    fn test_imgui_visibility_changes_capture() {
        let host_with = HeadlessHost::new("null").with_viewport(32, 32);
        let mut host_without = HeadlessHost::new("null").with_viewport(32, 32);
        host_without.set_imgui_visible(false);
        assert_ne!(
            host_with.render_frame().as_bytes(),
            host_without.render_frame().as_bytes()
        );
    }

    #[test]
    fn test_injected_failure_and_refusal() {
        let mut host = HeadlessHost::default();
        host.inject_capture_failure(FrameCaptureResult::UnsupportedFormat, "R10G10B10A2_UNORM");
        let request = CaptureRequest::Screenshot {
            path: "/nonexistent/never-written.png".to_string(),
        };
        host.request_capture(&request, CaptureTicket(1)).unwrap();
        let notification = &host.take_notifications()[0];
        assert_eq!(notification.result, FrameCaptureResult::UnsupportedFormat);
        assert!(host.captured_files().is_empty());

        host.set_refuse_captures(true);
        assert!(matches!(
            host.request_capture(&request, CaptureTicket(2)),
            Err(HostError::CaptureRefused(_))
        ));
    }

    #[test]
    fn test_held_captures_wait_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = HeadlessHost::default();
        host.set_hold_captures(true);
        let request = CaptureRequest::PassTimestamp {
            path: dir.path().join("ts.json").to_string_lossy().into_owned(),
        };
        host.request_capture(&request, CaptureTicket(3)).unwrap();
        assert!(host.take_notifications().is_empty());
        assert!(!host.is_frame_capture_pending());

        host.release_captures();
        assert_eq!(host.take_notifications().len(), 1);
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("ts.json")).unwrap()).unwrap();
        assert_eq!(json["kind"], "PassTimestamp");
    }

    #[test]
    fn test_only_held_screenshots_count_as_pending_frame_captures() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = HeadlessHost::default();
        host.set_hold_captures(true);
        let timestamp = CaptureRequest::PassTimestamp {
            path: dir.path().join("ts.json").to_string_lossy().into_owned(),
        };
        let screenshot = CaptureRequest::Screenshot {
            path: dir.path().join("shot.png").to_string_lossy().into_owned(),
        };
        host.request_capture(&timestamp, CaptureTicket(1)).unwrap();
        host.request_capture(&screenshot, CaptureTicket(2)).unwrap();
        assert!(host.is_frame_capture_pending());

        host.release_captures();
        assert!(host.is_frame_capture_pending());
        let tickets: Vec<_> = host.take_notifications().iter().map(|n| n.ticket).collect();
        assert_eq!(tickets, vec![CaptureTicket(1), CaptureTicket(2)]);
        assert!(!host.is_frame_capture_pending());
    }

    #[test]
    fn test_console_frame_time_override() {
        let mut host = HeadlessHost::default();
        host.execute_console_command("t_frameTimeOverride 0.016667");
        assert!((host.frame_time_override().unwrap() - 0.016667).abs() < 1e-6);
        host.execute_console_command("t_frameTimeOverride 0");
        assert_eq!(host.frame_time_override(), None);
        assert_eq!(host.console_history().len(), 2);
    }

    #[test]
    fn test_samples_and_tools() {
        let mut host = HeadlessHost::default().with_samples(["Features/Shadow"]);
        assert!(!host.open_sample("Features/Missing"));
        assert!(host.open_sample("Features/Shadow"));
        assert_eq!(host.current_sample(), Some("Features/Shadow"));

        assert!(host.show_tool("CPU Profiler", true));
        assert!(host.tool_visible("CPU Profiler"));
        assert!(!host.show_tool("Nope", true));
    }

    #[test]
    fn test_camera_commands_need_controller() {
        let mut host = HeadlessHost::default().without_camera_controller(CameraControllerKind::NoClip);
        host.apply_camera_command(&CameraCommand::ArcBallSetDistance(4.0));
        host.apply_camera_command(&CameraCommand::NoClipSetFov(1.0));
        assert_eq!(host.camera_state().arc_ball.distance, 4.0);
        assert_eq!(host.camera_state().no_clip.fov, 0.0);
    }

    #[test]
    fn test_manual_asset_tracker_counts() {
        let handle = ManualAssetTracker::new();
        let mut tracker = handle.clone();
        tracker.start();
        tracker.expect_asset("Materials\\Foo.material", 2);
        assert!(!tracker.did_expected_assets_finish());

        handle.complete_asset("materials/foo.material");
        assert!(!tracker.did_expected_assets_finish());
        handle.complete_asset("Materials/Foo.material");
        assert!(tracker.did_expected_assets_finish());

        tracker.stop();
        handle.complete_asset("materials/foo.material");
        assert!(!handle.is_tracking());
        assert!(tracker.did_expected_assets_finish());
    }

    #[test]
    fn test_directory_loader_falls_back_to_scripts_root() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(scripts.join("suite.lua"), "Print('hi')\n").unwrap();

        let loader = DirectoryScriptLoader::new(PathResolver::new(dir.path(), dir.path()), &scripts);
        let script = loader.load("suite.lua").unwrap();
        assert_eq!(script.source, "Print('hi')\n");
        assert!(script.identity.ends_with("scripts/suite.lua"));

        assert!(matches!(
            loader.load("missing.lua"),
            Err(HostError::ScriptNotFound(_))
        ));
    }

    #[test]
    fn test_memory_loader_normalizes_keys() {
        let loader = MemoryScriptLoader::new().with_script("scripts/./a.lua", "x");
        assert_eq!(loader.load("scripts\\a.lua").unwrap().identity, "scripts/a.lua");
    }
}
