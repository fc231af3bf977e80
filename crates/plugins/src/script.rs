use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rquickjs::{Context, Ctx, Runtime, Type, Value};
use serde::Deserialize;

use mocksmith_api::{Condition, ResponseSpec};
use mocksmith_interact::{Body, Request, Response};

use crate::{MatchPlugin, MockPlugin, PluginError};

const SUPPORTED_LANG: &str = "javascript";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_TIMEOUT: Duration = Duration::from_secs(3);

/// Evaluates javascript conditions and responders in a short-lived sandbox
/// per invocation; scripts cannot observe each other's state. Evaluation is
/// deadline-bounded through the engine's interrupt handler.
#[derive(Default)]
pub struct ScriptPlugin;

impl ScriptPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MatchPlugin for ScriptPlugin {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn matches(
        &self,
        request: &Request,
        condition: &Condition,
    ) -> Result<bool, PluginError> {
        let Condition::Script(script) = condition else {
            return Ok(false);
        };
        if script.lang != SUPPORTED_LANG {
            return Err(PluginError::UnsupportedLang(script.lang.clone()));
        }
        let request_json = marshal_request(request)?;
        let content = script.content.clone();
        let value =
            spawn_eval(move || evaluate(&request_json, &content, DEFAULT_TIMEOUT, Mode::Truthy))
                .await?;
        match value {
            Evaluated::Truthy(matched) => Ok(matched),
            Evaluated::Json(_) => unreachable!("truthy evaluation returns a boolean"),
        }
    }
}

#[async_trait]
impl MockPlugin for ScriptPlugin {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn mock_response(
        &self,
        spec: Option<&ResponseSpec>,
        request: &Request,
        response: &mut Response,
    ) -> Result<bool, PluginError> {
        let Some(ResponseSpec::Script(script)) = spec else {
            return Ok(false);
        };
        if script.lang != SUPPORTED_LANG {
            return Err(PluginError::UnsupportedLang(script.lang.clone()));
        }
        let timeout = effective_timeout(script.timeout);
        let request_json = marshal_request(request)?;
        let content = script.content.clone();
        let value =
            spawn_eval(move || evaluate(&request_json, &content, timeout, Mode::Json)).await?;
        let json = match value {
            Evaluated::Json(json) => json,
            Evaluated::Truthy(_) => unreachable!("json evaluation returns serialized output"),
        };
        apply_script_result(&json, response)?;
        Ok(false)
    }
}

/// The script's completion value deserialized into the existing response;
/// absent fields keep their previous values.
#[derive(Deserialize)]
struct ScriptResult {
    code: Option<u32>,
    header: Option<std::collections::HashMap<String, String>>,
    trailer: Option<std::collections::HashMap<String, String>>,
    body: Option<Body>,
}

fn apply_script_result(json: &str, response: &mut Response) -> Result<(), PluginError> {
    let result: ScriptResult =
        serde_json::from_str(json).map_err(|err| PluginError::Unmarshal(err.to_string()))?;
    if let Some(code) = result.code {
        response.code = code;
    }
    if let Some(header) = result.header {
        response.header = header;
    }
    if let Some(trailer) = result.trailer {
        response.trailer = trailer;
    }
    if let Some(body) = result.body {
        response.body = body;
    }
    Ok(())
}

fn marshal_request(request: &Request) -> Result<String, PluginError> {
    serde_json::to_string(request).map_err(|err| PluginError::Marshal(err.to_string()))
}

/// Response scripts may lower the deadline below the default but never past
/// the hard cap.
fn effective_timeout(configured: Option<Duration>) -> Duration {
    match configured {
        Some(timeout) if !timeout.is_zero() && timeout < MAX_TIMEOUT => timeout,
        _ => DEFAULT_TIMEOUT,
    }
}

enum Mode {
    Truthy,
    Json,
}

enum Evaluated {
    Truthy(bool),
    Json(String),
}

async fn spawn_eval<F>(eval: F) -> Result<Evaluated, PluginError>
where
    F: FnOnce() -> Result<Evaluated, PluginError> + Send + 'static,
{
    tokio::task::spawn_blocking(eval)
        .await
        .map_err(|err| PluginError::Script(format!("evaluation task failed: {err}")))?
}

fn evaluate(
    request_json: &str,
    script: &str,
    timeout: Duration,
    mode: Mode,
) -> Result<Evaluated, PluginError> {
    let runtime = Runtime::new().map_err(|err| PluginError::Script(err.to_string()))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let deadline = Instant::now() + timeout;
    {
        let interrupted = Arc::clone(&interrupted);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            if Instant::now() >= deadline {
                interrupted.store(true, Ordering::Relaxed);
                true
            } else {
                false
            }
        })));
    }

    let context = Context::full(&runtime).map_err(|err| PluginError::Script(err.to_string()))?;
    let result = context.with(|ctx| -> Result<Evaluated, PluginError> {
        ctx.eval::<(), _>(format!("const request = {request_json};"))
            .map_err(|err| exception_error(&ctx, err))?;
        let value: Value = ctx
            .eval(script.as_bytes().to_vec())
            .map_err(|err| exception_error(&ctx, err))?;
        match mode {
            Mode::Truthy => Ok(Evaluated::Truthy(is_truthy(&value))),
            Mode::Json => {
                let json = ctx
                    .json_stringify(value)
                    .map_err(|err| exception_error(&ctx, err))?
                    .map(|text| text.to_string())
                    .transpose()
                    .map_err(|err| PluginError::Script(err.to_string()))?
                    .unwrap_or_else(|| "null".to_string());
                Ok(Evaluated::Json(json))
            }
        }
    });

    if interrupted.load(Ordering::Relaxed) {
        return Err(PluginError::Timeout);
    }
    result
}

fn exception_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> PluginError {
    if matches!(err, rquickjs::Error::Exception) {
        let caught = ctx.catch();
        let message = if let Some(object) = caught.as_object() {
            object
                .get::<_, Option<String>>("message")
                .ok()
                .flatten()
        } else {
            caught
                .as_string()
                .and_then(|text| text.to_string().ok())
        };
        if let Some(message) = message {
            return PluginError::Script(message);
        }
    }
    PluginError::Script(err.to_string())
}

/// ECMAScript ToBoolean over the completion value.
fn is_truthy(value: &Value<'_>) -> bool {
    match value.type_of() {
        Type::Undefined | Type::Null => false,
        Type::Bool => value.as_bool().unwrap_or(false),
        Type::Int => value.as_int().map(|n| n != 0).unwrap_or(false),
        Type::Float => value
            .as_float()
            .map(|n| n != 0.0 && !n.is_nan())
            .unwrap_or(false),
        Type::String => value
            .as_string()
            .and_then(|text| text.to_string().ok())
            .map(|text| !text.is_empty())
            .unwrap_or(true),
        _ => true,
    }
}
