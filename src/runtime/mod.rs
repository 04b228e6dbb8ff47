//! Embedding seam: values, host functions, and the engine traits.
//!
//! [`stub`] is always available; the wasmtime backend is behind the
//! `wasmtime` cargo feature.

mod namespace;
pub mod stub;
mod traits;
mod value;
#[cfg(feature = "wasmtime")]
mod wasmtime;

pub use namespace::{HostCall, HostFunction, ImportNamespace};
pub use stub::{GuestEnv, StubEngine, StubMemory, StubModule};
pub use traits::{
    check_range, CompiledModule, Engine, GuestInstance, LinearMemory, NativeFunction, SharedMemory,
};
pub use value::{f64_arg, i32_arg, FunctionType, Value, ValueType};
#[cfg(feature = "wasmtime")]
pub use self::wasmtime::WasmtimeEngine;
