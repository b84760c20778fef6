//! Sandboxed evaluation of JavaScript failure conditions
//!
//! HTTP multi-endpoint services carry a JavaScript expression that is
//! evaluated after every check round. Two bindings are provided:
//!
//! - `results`: per-endpoint outcomes keyed by endpoint name
//! - `console.log(...)`: forwarded to the host log
//!
//! A truthy result signals an incident (the condition encodes *failure*).
//!
//! The engine context is not `Send`, so evaluation runs on a blocking
//! thread with a fresh context per call. Conditions are small (64 KiB
//! cap) and evaluated at probe cadence, so per-call context setup is
//! irrelevant next to the network round-trips it accompanies.

use anyhow::{anyhow, Result};
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsResult, JsValue, NativeFunction, Source};
use tracing::info;

/// Evaluate a condition against the results object
///
/// Returns the truthiness of the expression. Evaluation errors (syntax
/// errors, thrown exceptions, bad bindings) surface as `Err`.
pub async fn evaluate_condition(condition: String, results: serde_json::Value) -> Result<bool> {
    tokio::task::spawn_blocking(move || evaluate_sync(&condition, &results))
        .await
        .map_err(|e| anyhow!("condition evaluation task failed: {e}"))?
        .map_err(|e| anyhow!(e))
}

/// Synchronous core; exercised directly by tests
pub fn evaluate_sync(condition: &str, results: &serde_json::Value) -> Result<bool, String> {
    let mut context = Context::default();

    let results_value = JsValue::from_json(results, &mut context)
        .map_err(|e| format!("failed to bind results: {e}"))?;
    context
        .register_global_property(js_string!("results"), results_value, Attribute::all())
        .map_err(|e| format!("failed to bind results: {e}"))?;

    let console = ObjectInitializer::new(&mut context)
        .function(NativeFunction::from_fn_ptr(console_log), js_string!("log"), 0)
        .build();
    context
        .register_global_property(js_string!("console"), console, Attribute::all())
        .map_err(|e| format!("failed to bind console: {e}"))?;

    let value = context
        .eval(Source::from_bytes(condition))
        .map_err(|e| format!("condition evaluation failed: {e}"))?;

    Ok(value.to_boolean())
}

/// `console.log` binding that writes to the host log
fn console_log(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(arg.to_string(context)?.to_std_string_escaped());
    }
    info!(target: "sentinel::condition", "{}", parts.join(" "));
    Ok(JsValue::undefined())
}
