//! Lua script engine.
//!
//! Every script runs in a fresh Lua state. The names in
//! [`bridge::SCRIPT_FUNCTIONS`] are installed as globals for the duration of
//! the run and forward to [`bridge::call`], so a script can use loops, its
//! own functions and tables while every host call still lands on the
//! [`ScriptApi`] in program order.
//!
//! ```lua
//! local shots = '@user@/scripts/screenshots/shadow/'
//! function Shot(name)
//!     IdleFrames(1)
//!     CaptureScreenshot(shots .. name .. '.png')
//! end
//! for i = 1, 3 do
//!     ArcBallCameraController_SetHeading(DegToRad(i * 30))
//!     Shot('heading_' .. i)
//! end
//! ```

use std::cell::RefCell;

use mlua::{
    AnyUserData, Lua, MetaMethod, UserData, UserDataFields, UserDataMethods, Value, Variadic,
};

use crate::bridge::{self, BridgeError, EngineError, SCRIPT_FUNCTIONS, ScriptApi, ScriptEngine, ScriptValue};

/// The engine used by the CLI and the integration tests
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaScriptEngine;

impl LuaScriptEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for LuaScriptEngine {
    fn execute(&self, source: &str, script_name: &str, api: &mut dyn ScriptApi) -> Result<(), EngineError> {
        let api = RefCell::new(api);
        let lua = Lua::new();

        let result = lua.scope(|scope| {
            let globals = lua.globals();
            for name in SCRIPT_FUNCTIONS {
                let api = &api;
                let function = scope.create_function(move |lua, args: Variadic<Value>| {
                    let values = args
                        .iter()
                        .map(to_script_value)
                        .collect::<mlua::Result<Vec<_>>>()?;
                    let returned = {
                        let mut api = api.try_borrow_mut().map_err(mlua::Error::external)?;
                        bridge::call(&mut **api, name, &values).map_err(mlua::Error::external)?
                    };
                    to_lua_value(lua, returned)
                })?;
                globals.set(name, function)?;
            }

            // '@' makes Lua report positions as "<script>:<line>:"
            lua.load(source).set_name(format!("@{script_name}")).exec()
        });

        result.map_err(|err| engine_error(script_name, err))
    }
}

/// Vector values built by `Vector2`/`Vector3`, kept distinct from tables
#[derive(Debug, Clone, Copy, PartialEq)]
enum LuaVector {
    Two([f32; 2]),
    Three([f32; 3]),
}

impl LuaVector {
    fn component(&self, index: usize) -> Option<f32> {
        match self {
            LuaVector::Two(v) => v.get(index).copied(),
            LuaVector::Three(v) => v.get(index).copied(),
        }
    }

    fn to_script_value(self) -> ScriptValue {
        match self {
            LuaVector::Two(v) => ScriptValue::Vector2(v),
            LuaVector::Three(v) => ScriptValue::Vector3(v),
        }
    }
}

impl UserData for LuaVector {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("x", |_, this| Ok(this.component(0)));
        fields.add_field_method_get("y", |_, this| Ok(this.component(1)));
        fields.add_field_method_get("z", |_, this| Ok(this.component(2)));
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(this.to_script_value().to_string())
        });
    }
}

fn to_script_value(value: &Value<'_>) -> mlua::Result<ScriptValue> {
    match value {
        Value::Nil => Ok(ScriptValue::Nil),
        Value::Boolean(b) => Ok(ScriptValue::Bool(*b)),
        Value::Integer(i) => Ok(ScriptValue::Number(*i as f64)),
        Value::Number(n) => Ok(ScriptValue::Number(*n)),
        Value::String(s) => Ok(ScriptValue::String(s.to_str()?.to_string())),
        Value::Table(table) => table
            .clone()
            .sequence_values::<Value>()
            .map(|item| item.and_then(|item| to_script_value(&item)))
            .collect::<mlua::Result<Vec<_>>>()
            .map(ScriptValue::List),
        Value::UserData(data) => vector_from(data),
        other => Err(mlua::Error::FromLuaConversionError {
            from: other.type_name(),
            to: "ScriptValue",
            message: None,
        }),
    }
}

fn vector_from(data: &AnyUserData<'_>) -> mlua::Result<ScriptValue> {
    let vector = data.borrow::<LuaVector>().map_err(|_| mlua::Error::FromLuaConversionError {
        from: "userdata",
        to: "ScriptValue",
        message: Some("only Vector2 and Vector3 values can be passed to host functions".to_string()),
    })?;
    Ok(vector.to_script_value())
}

fn to_lua_value(lua: &Lua, value: ScriptValue) -> mlua::Result<Value<'_>> {
    Ok(match value {
        ScriptValue::Nil => Value::Nil,
        ScriptValue::Bool(b) => Value::Boolean(b),
        ScriptValue::Number(n) => Value::Number(n),
        ScriptValue::String(s) => Value::String(lua.create_string(&s)?),
        ScriptValue::List(items) => {
            let items = items
                .into_iter()
                .map(|item| to_lua_value(lua, item))
                .collect::<mlua::Result<Vec<_>>>()?;
            Value::Table(lua.create_sequence_from(items)?)
        }
        ScriptValue::Vector2(v) => Value::UserData(lua.create_userdata(LuaVector::Two(v))?),
        ScriptValue::Vector3(v) => Value::UserData(lua.create_userdata(LuaVector::Three(v))?),
    })
}

/// The argument error raised by a host function, if that is what stopped
/// the script
fn bridge_error(err: &mlua::Error) -> Option<BridgeError> {
    match err {
        mlua::Error::CallbackError { cause, .. } => bridge_error(cause),
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<BridgeError>().cloned(),
        _ => None,
    }
}

fn engine_error(script: &str, err: mlua::Error) -> EngineError {
    if let Some(source) = bridge_error(&err) {
        return EngineError::Call {
            script: script.to_string(),
            source,
        };
    }
    match err {
        mlua::Error::SyntaxError { message, .. } => EngineError::Syntax {
            script: script.to_string(),
            message,
        },
        other => EngineError::Runtime {
            script: script.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CameraCommand;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
    }

    impl Log {
        fn push(&mut self, call: String) {
            self.calls.push(call);
        }
    }

    impl ScriptApi for Log {
        fn run_script(&mut self, path: &str) {
            self.push(format!("RunScript {path}"));
        }
        fn error(&mut self, message: &str) {
            self.push(format!("Error {message}"));
        }
        fn warning(&mut self, message: &str) {
            self.push(format!("Warning {message}"));
        }
        fn print(&mut self, message: &str) {
            self.push(format!("Print {message}"));
        }
        fn idle_frames(&mut self, frames: u32) {
            self.push(format!("IdleFrames {frames}"));
        }
        fn idle_seconds(&mut self, seconds: f32) {
            self.push(format!("IdleSeconds {seconds}"));
        }
        fn lock_frame_time(&mut self, _seconds: f32) {}
        fn unlock_frame_time(&mut self) {}
        fn resize_viewport(&mut self, _width: u32, _height: u32) {}
        fn set_show_imgui(&mut self, _show: bool) {}
        fn execute_console_command(&mut self, _command: &str) {}
        fn resolve_path(&self, path: &str) -> String {
            path.replace("@user@", "/home/u")
        }
        fn render_api_name(&self) -> String {
            "dx12".into()
        }
        fn random_test_seed(&self) -> i32 {
            7
        }
        fn open_sample(&mut self, name: &str) {
            self.push(format!("OpenSample {name}"));
        }
        fn set_imgui_value(&mut self, args: &[ScriptValue]) {
            self.push(format!("SetImguiValue {:?}", args));
        }
        fn show_tool(&mut self, _name: &str, _enable: bool) {}
        fn select_image_comparison_tolerance_level(&mut self, _name: &str) {}
        fn capture_screenshot(&mut self, path: &str) {
            self.push(format!("CaptureScreenshot {path}"));
        }
        fn capture_screenshot_with_imgui(&mut self, _path: &str) {}
        fn capture_screenshot_with_preview(&mut self, _path: &str) {}
        fn capture_pass_attachment(&mut self, args: &[ScriptValue]) {
            self.push(format!("CapturePassAttachment {:?}", args));
        }
        fn capture_pass_timestamp(&mut self, _args: &[ScriptValue]) {}
        fn capture_cpu_frame_time(&mut self, _args: &[ScriptValue]) {}
        fn capture_pass_pipeline_statistics(&mut self, _args: &[ScriptValue]) {}
        fn capture_cpu_profiling_statistics(&mut self, _args: &[ScriptValue]) {}
        fn capture_benchmark_metadata(&mut self, _args: &[ScriptValue]) {}
        fn camera_command(&mut self, command: CameraCommand) {
            self.push(format!("{command:?}"));
        }
        fn asset_tracking_start(&mut self) {}
        fn asset_tracking_expect_asset(&mut self, _path: &str, _expected_count: u32) {}
        fn asset_tracking_idle_until_expected_assets_finish(&mut self, _timeout: f32) {}
        fn asset_tracking_stop(&mut self) {}
    }

    fn run(source: &str) -> (Log, Result<(), EngineError>) {
        let mut log = Log::default();
        let result = LuaScriptEngine.execute(source, "test.lua", &mut log);
        (log, result)
    }

    #[test]
    fn test_calls_run_in_order_and_comments_are_skipped() {
        let (log, result) = run(
            "-- header\n\
             OpenSample('Features/Shadow') -- trailing\n\
             \n\
             IdleFrames(3);\n\
             Print(\"done\")\n",
        );
        result.unwrap();
        assert_eq!(
            log.calls,
            vec!["OpenSample Features/Shadow", "IdleFrames 3", "Print done"]
        );
    }

    #[test]
    fn test_locals_concat_and_queries() {
        let (log, result) = run(
            "local folder = ResolvePath('@user@/scripts/screenshots/') .. GetRenderApiName()\n\
             CaptureScreenshot(folder .. '/shot_' .. 2 .. '.png')\n\
             Print(GetRandomTestSeed())\n",
        );
        result.unwrap();
        assert_eq!(
            log.calls,
            vec![
                "CaptureScreenshot /home/u/scripts/screenshots/dx12/shot_2.png",
                "Print 7",
            ]
        );
    }

    #[test]
    fn test_loops_queue_one_call_per_iteration() {
        let (log, result) = run("for i = 1, 3 do IdleFrames(i) end\n");
        result.unwrap();
        assert_eq!(log.calls, vec!["IdleFrames 1", "IdleFrames 2", "IdleFrames 3"]);
    }

    #[test]
    fn test_script_functions_can_wrap_host_calls() {
        let (log, result) = run(
            "function Shot(name)\n\
                 IdleFrames(1)\n\
                 CaptureScreenshot('@user@/' .. name .. '.png')\n\
             end\n\
             Shot('a')\n\
             Shot('b')\n",
        );
        result.unwrap();
        assert_eq!(
            log.calls,
            vec![
                "IdleFrames 1",
                "CaptureScreenshot @user@/a.png",
                "IdleFrames 1",
                "CaptureScreenshot @user@/b.png",
            ]
        );
    }

    #[test]
    fn test_calls_may_span_lines() {
        let (log, result) = run(
            "CapturePassAttachment({'Root',\n\
                                    'Pass'},\n\
                                   'Output',\n\
                                   'a.png')\n",
        );
        result.unwrap();
        assert_eq!(
            log.calls,
            vec![
                r#"CapturePassAttachment [List([String("Root"), String("Pass")]), String("Output"), String("a.png")]"#
            ]
        );
    }

    #[test]
    fn test_vectors_lists_and_negative_numbers() {
        let (log, result) = run(
            "SetImguiValue('Light/Direction', Vector3(0, -1, 0.5))\n\
             local v = Vector3(1, 2, 3)\n\
             Print(v.y)\n\
             ArcBallCameraController_SetHeading(DegToRad(0))\n",
        );
        result.unwrap();
        assert_eq!(
            log.calls,
            vec![
                r#"SetImguiValue [String("Light/Direction"), Vector3([0.0, -1.0, 0.5])]"#.to_string(),
                "Print 2".to_string(),
                "ArcBallSetHeading(0.0)".to_string(),
            ]
        );
    }

    #[test]
    fn test_argument_error_stops_the_script() {
        let (log, result) = run("Print('a')\nIdleFrames('x')\nPrint('b')\n");
        assert_eq!(log.calls, vec!["Print a"]);
        match result.unwrap_err() {
            EngineError::Call { script, source } => {
                assert_eq!(script, "test.lua");
                assert!(matches!(source, BridgeError::ArgumentType { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_runtime_error_names_script_and_line() {
        let (log, result) = run("Print('a')\nlocal t = nil\nt.x = 1\nPrint('b')\n");
        assert_eq!(log.calls, vec!["Print a"]);
        let err = result.unwrap_err();
        match &err {
            EngineError::Runtime { script, message } => {
                assert_eq!(script, "test.lua");
                assert!(message.contains("test.lua:3:"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().starts_with("test.lua: "));
    }

    #[test]
    fn test_unknown_global_is_a_runtime_error() {
        let (log, result) = run("Teleport('home')\n");
        assert!(log.calls.is_empty());
        assert!(matches!(result, Err(EngineError::Runtime { .. })));
    }

    #[test]
    fn test_syntax_error_runs_nothing() {
        let (log, result) = run("Print('a')\nPrint('unterminated)\n");
        assert!(log.calls.is_empty());
        assert!(matches!(result, Err(EngineError::Syntax { ref script, .. }) if script == "test.lua"));
    }

    #[test]
    fn test_escapes_in_strings() {
        let (log, result) = run(r#"Print('it\'s "quoted"')"#);
        result.unwrap();
        assert_eq!(log.calls, vec![r#"Print it's "quoted""#]);
    }
}
