//! A validated accessor over request parameters.
//!
//! Handlers receive a [`Params`] view instead of the raw `params` value.
//! Typed accessors either produce the requested value or raise an
//! INVALID_PARAMS [`RpcError`] whose message names the offending parameter,
//! so a handler body can stay a straight line of `?` operators.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::RpcError;

/// The parameters of one inbound request, tagged with the method name for
/// error messages.
#[derive(Debug, Clone)]
pub struct Params {
    method: Arc<str>,
    value: Option<Value>,
}

impl Params {
    pub(crate) fn new(method: &str, value: Option<Value>) -> Self {
        Self {
            method: Arc::from(method),
            value,
        }
    }

    /// The name of the method these parameters were sent to.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The raw params value, if the request carried one.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Whether the parameters were passed by position.
    pub fn is_positional(&self) -> bool {
        matches!(self.value, Some(Value::Array(_)))
    }

    /// Whether the parameters were passed by name.
    pub fn is_named(&self) -> bool {
        matches!(self.value, Some(Value::Object(_)))
    }

    /// A named parameter.
    pub fn get(&self, name: &str) -> Param<'_> {
        Param {
            method: &self.method,
            path: format!("\"{}\"", name),
            value: self.value.as_ref().and_then(|v| v.get(name)),
        }
    }

    /// A positional parameter.
    pub fn idx(&self, index: usize) -> Param<'_> {
        Param {
            method: &self.method,
            path: index.to_string(),
            value: self.value.as_ref().and_then(|v| v.get(index)),
        }
    }

    /// The whole parameter list, requiring positional passing.
    pub fn as_array(&self) -> Result<&Vec<Value>, RpcError> {
        match &self.value {
            Some(Value::Array(list)) => Ok(list),
            _ => Err(RpcError::invalid_params(format!(
                "Parameters for method \"{}\" must be passed by position.",
                self.method
            ))),
        }
    }

    /// The whole parameter map, requiring named passing.
    pub fn as_object(&self) -> Result<&Map<String, Value>, RpcError> {
        match &self.value {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(RpcError::invalid_params(format!(
                "Parameters for method \"{}\" must be passed by name.",
                self.method
            ))),
        }
    }
}

/// A single parameter, addressed by name or index, possibly nested.
#[derive(Debug, Clone)]
pub struct Param<'a> {
    method: &'a str,
    path: String,
    value: Option<&'a Value>,
}

impl<'a> Param<'a> {
    /// Whether the parameter was provided at all.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// The raw value; an error when the parameter was not provided.
    pub fn value(&self) -> Result<&'a Value, RpcError> {
        self.value.ok_or_else(|| {
            RpcError::invalid_params(format!("Required parameter {} not provided.", self.path))
        })
    }

    /// The raw value, or `default` when the parameter was not provided.
    pub fn value_or(&self, default: Value) -> Value {
        self.value.cloned().unwrap_or(default)
    }

    /// A nested named parameter.
    pub fn get(&self, name: &str) -> Param<'a> {
        Param {
            method: self.method,
            path: format!("{}.\"{}\"", self.path, name),
            value: self.value.and_then(|v| v.get(name)),
        }
    }

    /// A nested positional parameter.
    pub fn idx(&self, index: usize) -> Param<'a> {
        Param {
            method: self.method,
            path: format!("{}.{}", self.path, index),
            value: self.value.and_then(|v| v.get(index)),
        }
    }

    fn typed<T>(
        &self,
        expected: &str,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<T, RpcError> {
        let value = self.value()?;
        extract(value).ok_or_else(|| {
            RpcError::invalid_params(format!(
                "Parameter {} for method \"{}\" must be {}, but was {}.",
                self.path, self.method, expected, value
            ))
        })
    }

    pub fn as_f64(&self) -> Result<f64, RpcError> {
        self.typed("a number", Value::as_f64)
    }

    pub fn as_i64(&self) -> Result<i64, RpcError> {
        self.typed("an integer", Value::as_i64)
    }

    pub fn as_bool(&self) -> Result<bool, RpcError> {
        self.typed("a boolean", Value::as_bool)
    }

    pub fn as_str(&self) -> Result<&'a str, RpcError> {
        self.typed("a string", Value::as_str)
    }

    pub fn as_array(&self) -> Result<&'a Vec<Value>, RpcError> {
        self.typed("an Array", Value::as_array)
    }

    pub fn as_object(&self) -> Result<&'a Map<String, Value>, RpcError> {
        self.typed("an Object", Value::as_object)
    }

    pub fn as_f64_or(&self, default: f64) -> Result<f64, RpcError> {
        if self.exists() {
            self.as_f64()
        } else {
            Ok(default)
        }
    }

    pub fn as_i64_or(&self, default: i64) -> Result<i64, RpcError> {
        if self.exists() {
            self.as_i64()
        } else {
            Ok(default)
        }
    }

    pub fn as_bool_or(&self, default: bool) -> Result<bool, RpcError> {
        if self.exists() {
            self.as_bool()
        } else {
            Ok(default)
        }
    }

    pub fn as_str_or(&self, default: &'a str) -> Result<&'a str, RpcError> {
        if self.exists() {
            self.as_str()
        } else {
            Ok(default)
        }
    }
}
