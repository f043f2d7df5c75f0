//! Script-facing entry points of the runner.
//!
//! Everything here only enqueues. Functions that take raw arguments check
//! them right away and report a script error instead of enqueueing.

use super::{ScriptOp, ScriptRunner};
use crate::bridge::{ScriptApi, ScriptValue};
use crate::host::{AutomationHost, CameraCommand, CaptureRequest, ImguiValue, ReadbackOption};

impl<H: AutomationHost> ScriptRunner<H> {
    fn enqueue(&mut self, op: ScriptOp) {
        self.queue.push_back(op);
    }

    fn enqueue_screenshot(&mut self, request: CaptureRequest, imgui: Option<bool>) {
        if let Some(show) = imgui {
            self.enqueue(ScriptOp::SetShowImGui(show));
        }
        self.enqueue(ScriptOp::Capture(request));
        self.enqueue(ScriptOp::CheckLatestScreenshot);
        if imgui.is_some() {
            self.enqueue(ScriptOp::RestoreShowImGui);
        }
    }

    /// The single output path of a profiling capture
    fn profiling_path(&mut self, args: &[ScriptValue]) -> Option<String> {
        if args.len() != 1 {
            self.reporter
                .report_script_error("ProfilingCaptureScriptDataContext needs one argument");
            return None;
        }
        match args[0].as_str() {
            Some(path) => Some(path.to_string()),
            None => {
                self.reporter.report_script_error(
                    "ProfilingCaptureScriptDataContext's first (and only) argument must be of type string",
                );
                None
            }
        }
    }

    fn pass_attachment_request(&mut self, args: &[ScriptValue]) -> Option<CaptureRequest> {
        if args.len() != 3 && args.len() != 4 {
            self.reporter
                .report_script_error("CapturePassAttachment needs three or four arguments");
            return None;
        }

        let ScriptValue::List(hierarchy) = &args[0] else {
            self.reporter
                .report_script_error("CapturePassAttachment's first argument must be a table of strings");
            return None;
        };

        let (Some(slot), Some(path)) = (args[1].as_str(), args[2].as_str()) else {
            self.reporter
                .report_script_error("CapturePassAttachment's second and third argument must be strings");
            return None;
        };

        let readback = match args.get(3) {
            None => ReadbackOption::Output,
            Some(value) => match value.as_str() {
                Some("Input") => ReadbackOption::Input,
                Some("Output") => ReadbackOption::Output,
                _ => {
                    self.reporter.report_script_error(
                        "CapturePassAttachment's forth argument must be a string 'Input' or 'Output'",
                    );
                    return None;
                }
            },
        };

        let mut pass_hierarchy = Vec::with_capacity(hierarchy.len());
        for entry in hierarchy {
            match entry.as_str() {
                Some(name) => pass_hierarchy.push(name.to_string()),
                None => {
                    self.reporter
                        .report_script_error("CapturePassAttachment's first argument must contain only strings");
                    return None;
                }
            }
        }

        Some(CaptureRequest::PassAttachment {
            pass_hierarchy,
            slot: slot.to_string(),
            path: path.to_string(),
            readback,
        })
    }
}

impl<H: AutomationHost> ScriptApi for ScriptRunner<H> {
    fn run_script(&mut self, path: &str) {
        self.execute_script(path);
    }

    fn error(&mut self, message: &str) {
        self.enqueue(ScriptOp::Error(message.to_string()));
    }

    fn warning(&mut self, message: &str) {
        self.enqueue(ScriptOp::Warning(message.to_string()));
    }

    fn print(&mut self, message: &str) {
        self.enqueue(ScriptOp::Print(message.to_string()));
    }

    fn idle_frames(&mut self, frames: u32) {
        self.enqueue(ScriptOp::IdleFrames(frames));
    }

    fn idle_seconds(&mut self, seconds: f32) {
        self.enqueue(ScriptOp::IdleSeconds(seconds));
    }

    fn lock_frame_time(&mut self, seconds: f32) {
        self.enqueue(ScriptOp::LockFrameTime(seconds));
    }

    fn unlock_frame_time(&mut self) {
        self.enqueue(ScriptOp::UnlockFrameTime);
    }

    fn resize_viewport(&mut self, width: u32, height: u32) {
        self.enqueue(ScriptOp::ResizeViewport { width, height });
    }

    fn set_show_imgui(&mut self, show: bool) {
        self.enqueue(ScriptOp::SetShowImGui(show));
    }

    fn execute_console_command(&mut self, command: &str) {
        self.enqueue(ScriptOp::ExecuteConsoleCommand(command.to_string()));
    }

    fn resolve_path(&self, path: &str) -> String {
        self.resolver.resolve(path)
    }

    fn render_api_name(&self) -> String {
        self.host.render_api_name()
    }

    fn random_test_seed(&self) -> i32 {
        self.suite.random_seed
    }

    fn open_sample(&mut self, name: &str) {
        self.enqueue(ScriptOp::OpenSample(name.to_string()));
    }

    fn set_imgui_value(&mut self, args: &[ScriptValue]) {
        if args.len() != 2 {
            self.reporter
                .report_script_error("Wrong number of arguments for SetImguiValue");
            return;
        }
        let Some(field) = args[0].as_str() else {
            self.reporter
                .report_script_error("SetImguiValue first argument must be a string");
            return;
        };

        let value = match &args[1] {
            ScriptValue::Bool(b) => ImguiValue::Bool(*b),
            ScriptValue::Number(n) => ImguiValue::Number(*n as f32),
            ScriptValue::String(s) => ImguiValue::String(s.clone()),
            ScriptValue::Vector2(v) => ImguiValue::Vec2(*v),
            ScriptValue::Vector3(v) => ImguiValue::Vec3(*v),
            other => {
                let message = format!(
                    "SetImguiValue second argument has unsupported type '{}'",
                    other.type_name()
                );
                self.reporter.report_script_error(&message);
                return;
            }
        };

        self.enqueue(ScriptOp::SetImguiValue {
            field: field.to_string(),
            value,
        });
    }

    fn show_tool(&mut self, name: &str, enable: bool) {
        self.enqueue(ScriptOp::ShowTool {
            name: name.to_string(),
            enable,
        });
    }

    fn select_image_comparison_tolerance_level(&mut self, name: &str) {
        self.enqueue(ScriptOp::SelectToleranceLevel(name.to_string()));
    }

    fn capture_screenshot(&mut self, path: &str) {
        let request = CaptureRequest::Screenshot { path: path.to_string() };
        self.enqueue_screenshot(request, Some(false));
    }

    fn capture_screenshot_with_imgui(&mut self, path: &str) {
        let request = CaptureRequest::Screenshot { path: path.to_string() };
        self.enqueue_screenshot(request, Some(true));
    }

    fn capture_screenshot_with_preview(&mut self, path: &str) {
        let request = CaptureRequest::ScreenshotWithPreview { path: path.to_string() };
        self.enqueue_screenshot(request, None);
    }

    fn capture_pass_attachment(&mut self, args: &[ScriptValue]) {
        if let Some(request) = self.pass_attachment_request(args) {
            self.enqueue_screenshot(request, None);
        }
    }

    fn capture_pass_timestamp(&mut self, args: &[ScriptValue]) {
        if let Some(path) = self.profiling_path(args) {
            self.enqueue(ScriptOp::Capture(CaptureRequest::PassTimestamp { path }));
        }
    }

    fn capture_cpu_frame_time(&mut self, args: &[ScriptValue]) {
        if let Some(path) = self.profiling_path(args) {
            self.enqueue(ScriptOp::Capture(CaptureRequest::CpuFrameTime { path }));
        }
    }

    fn capture_pass_pipeline_statistics(&mut self, args: &[ScriptValue]) {
        if let Some(path) = self.profiling_path(args) {
            self.enqueue(ScriptOp::Capture(CaptureRequest::PassPipelineStatistics { path }));
        }
    }

    fn capture_cpu_profiling_statistics(&mut self, args: &[ScriptValue]) {
        if let Some(path) = self.profiling_path(args) {
            self.enqueue(ScriptOp::Capture(CaptureRequest::CpuProfilingStatistics { path }));
        }
    }

    fn capture_benchmark_metadata(&mut self, args: &[ScriptValue]) {
        if args.len() != 2 {
            self.reporter.report_script_error(
                "CaptureBenchmarkMetadata needs two arguments, benchmarkName and outputFilePath.",
            );
            return;
        }
        let (Some(name), Some(path)) = (args[0].as_str(), args[1].as_str()) else {
            self.reporter.report_script_error(
                "CaptureBenchmarkMetadata's arguments benchmarkName and outputFilePath must both be of type string.",
            );
            return;
        };
        self.enqueue(ScriptOp::Capture(CaptureRequest::BenchmarkMetadata {
            name: name.to_string(),
            path: path.to_string(),
        }));
    }

    fn camera_command(&mut self, command: CameraCommand) {
        self.enqueue(ScriptOp::Camera(command));
    }

    fn asset_tracking_start(&mut self) {
        self.enqueue(ScriptOp::AssetTrackingStart);
    }

    fn asset_tracking_expect_asset(&mut self, path: &str, expected_count: u32) {
        self.enqueue(ScriptOp::AssetTrackingExpectAsset {
            path: path.to_string(),
            expected_count,
        });
    }

    fn asset_tracking_idle_until_expected_assets_finish(&mut self, timeout: f32) {
        self.enqueue(ScriptOp::AssetTrackingIdleUntilFinished { timeout });
    }

    fn asset_tracking_stop(&mut self) {
        self.enqueue(ScriptOp::AssetTrackingStop);
    }
}
