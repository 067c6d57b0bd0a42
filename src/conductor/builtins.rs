//! Evaluation of the builtin function bodies emitted by lowering

use serde_json::{json, Map, Value as JsonValue};

use super::executor::TaskError;
use crate::composer::Builtin;
use crate::value::{copy_params, deep_copy, Env, Params};

pub fn evaluate(
    op: &Builtin,
    params: &Params,
    env: &mut Env,
) -> Result<Option<JsonValue>, TaskError> {
    match op {
        Builtin::Capture { symbol } => {
            *binding(env, symbol)? = JsonValue::Object(copy_params(params));
            Ok(None)
        }

        Builtin::Get { symbol } => Ok(Some(deep_copy(binding(env, symbol)?))),

        Builtin::CountDown { symbol } => count_down(env, symbol).map(|b| Some(json!(b))),

        Builtin::RetryCheck { symbol } => {
            let failed = params
                .get("result")
                .and_then(JsonValue::as_object)
                .map_or(false, |result| result.contains_key("error"));
            if !failed {
                return Ok(Some(json!(false)));
            }
            count_down(env, symbol).map(|b| Some(json!(b)))
        }

        Builtin::Wrap { field } => {
            let mut wrapped = Map::new();
            wrapped.insert(field.clone(), JsonValue::Object(copy_params(params)));
            Ok(Some(JsonValue::Object(wrapped)))
        }

        // An absent field leaves params as they are
        Builtin::Field { field } => Ok(params.get(field).map(deep_copy)),

        Builtin::Retain { symbol } => Ok(Some(json!({
            "params": deep_copy(binding(env, symbol)?),
            "result": JsonValue::Object(copy_params(params)),
        }))),

        Builtin::UnwrapResult => {
            let result = params
                .get("result")
                .and_then(JsonValue::as_object)
                .ok_or_else(|| TaskError::Type("Cannot read property 'result' of undefined".into()))?;

            let mut out = Map::new();
            if let Some(saved) = params.get("params") {
                out.insert("params".to_string(), deep_copy(saved));
            }
            if let Some(inner) = result.get("result") {
                out.insert("result".to_string(), deep_copy(inner));
            }
            Ok(Some(JsonValue::Object(out)))
        }

        Builtin::Merge => {
            let mut merged = params
                .get("params")
                .and_then(JsonValue::as_object)
                .cloned()
                .ok_or_else(|| TaskError::Type("Cannot merge into a non-object".into()))?;
            if let Some(result) = params.get("result").and_then(JsonValue::as_object) {
                for (k, v) in result {
                    merged.insert(k.clone(), deep_copy(v));
                }
            }
            Ok(Some(JsonValue::Object(merged)))
        }
    }
}

fn binding<'a>(env: &'a mut Env, symbol: &str) -> Result<&'a mut JsonValue, TaskError> {
    env.get_mut(symbol)
        .ok_or_else(|| TaskError::Unbound(symbol.to_string()))
}

/// `symbol-- > 0`
fn count_down(env: &mut Env, symbol: &str) -> Result<bool, TaskError> {
    let value = binding(env, symbol)?;
    if let Some(n) = value.as_i64() {
        *value = json!(n - 1);
        return Ok(n > 0);
    }
    if let Some(n) = value.as_f64() {
        *value = json!(n - 1.0);
        return Ok(n > 0.0);
    }
    Err(TaskError::Type(format!("'{}' is not a number", symbol)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::into_params;

    fn env(value: JsonValue) -> Env {
        into_params(value)
    }

    #[test]
    fn test_capture_and_get() {
        let mut env = env(json!({"params": null}));
        let params = into_params(json!({"n": 1}));

        assert_eq!(
            evaluate(&Builtin::Capture { symbol: "params".into() }, &params, &mut env).unwrap(),
            None
        );
        assert_eq!(env["params"], json!({"n": 1}));

        let got = evaluate(&Builtin::Get { symbol: "params".into() }, &Params::new(), &mut env)
            .unwrap();
        assert_eq!(got, Some(json!({"n": 1})));
    }

    #[test]
    fn test_unbound_symbol() {
        let err = evaluate(&Builtin::Get { symbol: "x".into() }, &Params::new(), &mut Env::new())
            .unwrap_err();
        assert!(matches!(err, TaskError::Unbound(name) if name == "x"));
    }

    #[test]
    fn test_count_down() {
        let mut env = env(json!({"count": 1}));
        let op = Builtin::CountDown { symbol: "count".into() };

        assert_eq!(evaluate(&op, &Params::new(), &mut env).unwrap(), Some(json!(true)));
        assert_eq!(evaluate(&op, &Params::new(), &mut env).unwrap(), Some(json!(false)));
        assert_eq!(env["count"], json!(-1));
    }

    #[test]
    fn test_retry_check_short_circuits_on_success() {
        let mut env = env(json!({"count": 3}));
        let op = Builtin::RetryCheck { symbol: "count".into() };

        let ok = into_params(json!({"result": {"value": 1}}));
        assert_eq!(evaluate(&op, &ok, &mut env).unwrap(), Some(json!(false)));
        assert_eq!(env["count"], json!(3));

        let failed = into_params(json!({"result": {"error": "boom"}}));
        assert_eq!(evaluate(&op, &failed, &mut env).unwrap(), Some(json!(true)));
        assert_eq!(env["count"], json!(2));
    }

    #[test]
    fn test_field() {
        let op = Builtin::Field { field: "result".into() };
        let params = into_params(json!({"result": {"n": 1}}));
        assert_eq!(evaluate(&op, &params, &mut Env::new()).unwrap(), Some(json!({"n": 1})));

        // Nothing to select: the task keeps the current params
        let params = into_params(json!({"n": 1}));
        assert_eq!(evaluate(&op, &params, &mut Env::new()).unwrap(), None);
    }

    #[test]
    fn test_unwrap_and_merge() {
        let params = into_params(json!({"params": {"a": 1}, "result": {"result": {"b": 2}}}));
        let unwrapped = evaluate(&Builtin::UnwrapResult, &params, &mut Env::new()).unwrap();
        assert_eq!(unwrapped, Some(json!({"params": {"a": 1}, "result": {"b": 2}})));

        let merged = evaluate(
            &Builtin::Merge,
            &into_params(unwrapped.unwrap()),
            &mut Env::new(),
        )
        .unwrap();
        assert_eq!(merged, Some(json!({"a": 1, "b": 2})));

        assert!(evaluate(&Builtin::UnwrapResult, &Params::new(), &mut Env::new()).is_err());
    }
}
