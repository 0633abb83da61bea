#![forbid(unsafe_code)]

//! Command line values: `TYPE=JSON` arguments, `name=value` keywords and
//! JSON rendering of results.

use miette::Diagnostic;
use ndcall_core::{Array, CallError, KwdValue, Scalar, ScalarKind, Type};
use ndcall_types::ParseError;
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ValueError {
    #[error("expected `{expected}`, got `{input}`")]
    #[diagnostic(code(ndcall::cli::syntax))]
    Syntax { expected: &'static str, input: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(#[from] ParseError),

    #[error("invalid JSON: {0}")]
    #[diagnostic(code(ndcall::cli::json))]
    Json(#[from] serde_json::Error),

    #[error("value does not fit `{ty}`: {message}")]
    #[diagnostic(code(ndcall::cli::shape))]
    Shape { ty: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Call(#[from] CallError),
}

/// Parses `3 * int32=[1, 2, 3]` into an array of that type.
pub fn parse_arg(input: &str) -> Result<Array, ValueError> {
    let (ty, json) = input.split_once('=').ok_or_else(|| ValueError::Syntax {
        expected: "TYPE=JSON",
        input: input.to_string(),
    })?;
    let ty: Type = ty.trim().parse()?;
    let json: Value = serde_json::from_str(json)?;
    array_from_json(&ty, &json)
}

/// Parses `name=value`. Numbers and booleans become scalars, anything else
/// is read as a type.
pub fn parse_kwd(input: &str) -> Result<(String, KwdValue), ValueError> {
    let (name, raw) = input.split_once('=').ok_or_else(|| ValueError::Syntax {
        expected: "NAME=VALUE",
        input: input.to_string(),
    })?;
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_))) => KwdValue::Scalar(leaf_scalar(&v).ok_or_else(
            || ValueError::Syntax {
                expected: "a number",
                input: raw.to_string(),
            },
        )?),
        _ => KwdValue::Type(raw.trim().parse()?),
    };
    Ok((name.trim().to_string(), value))
}

pub fn array_from_json(ty: &Type, json: &Value) -> Result<Array, ValueError> {
    let shape_err = |message: String| ValueError::Shape {
        ty: ty.to_string(),
        message,
    };
    let shape = ty
        .shape()
        .filter(|_| !ty.is_symbolic())
        .ok_or_else(|| shape_err("the type must be concrete".into()))?;
    let kind = ty
        .dtype()
        .scalar_kind()
        .ok_or_else(|| shape_err("the element type must be a scalar".into()))?;

    let mut leaves = Vec::new();
    flatten(json, &shape, &mut leaves).map_err(shape_err)?;
    let values = leaves
        .into_iter()
        .map(|v| element(kind, v))
        .collect::<Result<Vec<_>, _>>()
        .map_err(shape_err)?;
    Ok(Array::from_scalars(ty, &values)?)
}

fn flatten<'v>(json: &'v Value, shape: &[usize], out: &mut Vec<&'v Value>) -> Result<(), String> {
    let Some((&n, rest)) = shape.split_first() else {
        if json.is_array() {
            return Err("too many nesting levels".into());
        }
        out.push(json);
        return Ok(());
    };
    match json {
        Value::Array(items) if items.len() == n => {
            for item in items {
                flatten(item, rest, out)?;
            }
            Ok(())
        }
        Value::Array(items) => Err(format!("expected {n} elements, found {}", items.len())),
        other => Err(format!("expected a list of {n} elements, found `{other}`")),
    }
}

fn leaf_scalar(v: &Value) -> Option<Scalar> {
    match v {
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(Scalar::Int)
            .or_else(|| n.as_u64().map(Scalar::UInt))
            .or_else(|| n.as_f64().map(Scalar::Float)),
        _ => None,
    }
}

fn element(kind: ScalarKind, v: &Value) -> Result<Scalar, String> {
    let s = leaf_scalar(v).ok_or_else(|| format!("`{v}` is not a {kind} value"))?;
    match (kind, s) {
        (ScalarKind::Bool, Scalar::Bool(_)) => Ok(s),
        (ScalarKind::Bool, _) => Err(format!("`{v}` is not a boolean")),
        (k, Scalar::Float(_)) if !k.is_float() => Err(format!("`{v}` is not an integer")),
        _ => Ok(s),
    }
}

/// JSON rendering of a call result.
#[derive(Debug, Clone, Serialize)]
pub struct ArrayReport {
    #[serde(rename = "type")]
    pub ty: String,
    pub shape: Vec<usize>,
    pub values: Value,
}

impl ArrayReport {
    pub fn new(array: &Array) -> Result<Self, ValueError> {
        let flat: Vec<Value> = array.to_scalars()?.into_iter().map(scalar_json).collect();
        let shape = array.shape();
        Ok(ArrayReport {
            ty: array.ty().to_string(),
            values: nest(&flat, &shape),
            shape,
        })
    }
}

fn scalar_json(s: Scalar) -> Value {
    match s {
        Scalar::Bool(b) => Value::Bool(b),
        Scalar::Int(i) => Value::from(i),
        Scalar::UInt(u) => Value::from(u),
        Scalar::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
    }
}

fn nest(flat: &[Value], shape: &[usize]) -> Value {
    let Some((&n, rest)) = shape.split_first() else {
        return flat.first().cloned().unwrap_or(Value::Null);
    };
    let step: usize = rest.iter().product();
    Value::Array((0..n).map(|i| nest(&flat[i * step..(i + 1) * step], rest)).collect())
}
