//! Scalar values that cross the host/guest call boundary.

use crate::error::{Result, SandboxError};
use std::fmt;

/// A numeric scalar passed to or returned from a boundary call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit integer (pointers, handles, counts)
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
}

impl Value {
    /// Returns the type of this value.
    #[must_use]
    pub fn ty(&self) -> ValueType {
        match self {
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
        }
    }

    /// Returns the inner value if this is an `I32`.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the inner value if this is an `F64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }
}

/// The type of a boundary scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Parameter and result types of a boundary function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    params: Vec<ValueType>,
    results: Vec<ValueType>,
}

impl FunctionType {
    /// Creates a function type.
    #[must_use]
    pub fn new(
        params: impl IntoIterator<Item = ValueType>,
        results: impl IntoIterator<Item = ValueType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// Returns the parameter types.
    #[must_use]
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// Returns the result types.
    #[must_use]
    pub fn results(&self) -> &[ValueType] {
        &self.results
    }

    /// Checks that `args` match the parameter types.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error naming `function` on arity or
    /// type mismatch.
    pub fn check_args(&self, function: &str, args: &[Value]) -> Result<()> {
        if args.len() != self.params.len() {
            return Err(SandboxError::invalid_argument(
                function,
                format!(
                    "expected {} arguments, got {}",
                    self.params.len(),
                    args.len()
                ),
            ));
        }

        for (index, (arg, expected)) in args.iter().zip(&self.params).enumerate() {
            if arg.ty() != *expected {
                return Err(SandboxError::invalid_argument(
                    function,
                    format!("argument {index} must be {expected}, got {}", arg.ty()),
                ));
            }
        }

        Ok(())
    }
}

/// Reads the `i32` argument at `index`.
///
/// # Errors
///
/// Returns an invalid argument error if the argument is missing or not an `i32`.
pub fn i32_arg(args: &[Value], index: usize, argument: &str) -> Result<i32> {
    args.get(index)
        .and_then(Value::as_i32)
        .ok_or_else(|| SandboxError::invalid_argument(argument, "expected an i32 argument"))
}

/// Reads the `f64` argument at `index`.
///
/// # Errors
///
/// Returns an invalid argument error if the argument is missing or not an `f64`.
pub fn f64_arg(args: &[Value], index: usize, argument: &str) -> Result<f64> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| SandboxError::invalid_argument(argument, "expected an f64 argument"))
}
