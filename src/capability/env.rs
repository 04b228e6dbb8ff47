//! `env` group expected by AssemblyScript guests.

use super::HostTrait;
use crate::error::{Result, SandboxError};
use crate::interop::StringDecoder;
use crate::pool::ContextHandle;
use crate::runtime::{
    f64_arg, i32_arg, FunctionType, HostFunction, ImportNamespace, LinearMemory, Value, ValueType,
};

/// Import group of the environment functions.
pub const ENV_GROUP: &str = "env";

/// `abort`, `trace` and `seed` for one execution context.
#[derive(Debug)]
pub struct EnvTrait {
    ctx: ContextHandle,
    decoder: StringDecoder,
}

impl EnvTrait {
    /// Binds the trait to `ctx`, decoding guest strings with `decoder`.
    #[must_use]
    pub fn new(ctx: ContextHandle, decoder: StringDecoder) -> Self {
        Self { ctx, decoder }
    }
}

// Messages passed to abort may themselves be garbage.
fn decode_lossy(decoder: StringDecoder, memory: &dyn LinearMemory, ptr: i32) -> String {
    if ptr == 0 {
        return String::new();
    }
    decoder
        .decode(memory, ptr)
        .unwrap_or_else(|e| format!("<unreadable string at {ptr}: {e}>"))
}

impl HostTrait for EnvTrait {
    fn export_to_guest(&self, imports: &mut ImportNamespace) -> Result<()> {
        let slot = self.ctx.slot();
        let decoder = self.decoder;
        let abort = HostFunction::new(
            FunctionType::new([ValueType::I32; 4], []),
            move |call, args| {
                let message = decode_lossy(decoder, call.memory(), i32_arg(args, 0, "msg")?);
                let file = decode_lossy(decoder, call.memory(), i32_arg(args, 1, "file")?);
                let line = i32_arg(args, 2, "line")?;
                let column = i32_arg(args, 3, "col")?;
                tracing::error!(slot, %message, %file, line, column, "Guest aborted");
                Err(SandboxError::call_failed(
                    "env.abort",
                    format!("{message} at {file}:{line}:{column}"),
                ))
            },
        );

        let decoder = self.decoder;
        let trace = HostFunction::new(
            FunctionType::new(
                [
                    ValueType::I32,
                    ValueType::I32,
                    ValueType::F64,
                    ValueType::F64,
                    ValueType::F64,
                    ValueType::F64,
                    ValueType::F64,
                ],
                [],
            ),
            move |call, args| {
                let message = decode_lossy(decoder, call.memory(), i32_arg(args, 0, "msg")?);
                let count = usize::try_from(i32_arg(args, 1, "n")?).unwrap_or(0).min(5);
                let values = (0..count)
                    .map(|i| f64_arg(args, 2 + i, "a"))
                    .collect::<Result<Vec<_>>>()?;
                tracing::info!(slot, %message, ?values, "Guest trace");
                Ok(Vec::new())
            },
        );

        let seed = HostFunction::new(FunctionType::new([], [ValueType::F64]), |_call, _args| {
            let now = chrono::Utc::now();
            let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_millis());
            Ok(vec![Value::F64(nanos as f64)])
        });

        imports.register(ENV_GROUP, [("abort", abort), ("trace", trace), ("seed", seed)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HostCall, StubMemory};

    fn env() -> ImportNamespace {
        let ctx = ContextHandle::new(0, tokio::runtime::Handle::current());
        let mut imports = ImportNamespace::new();
        EnvTrait::new(ctx, StringDecoder::CString)
            .export_to_guest(&mut imports)
            .unwrap();
        imports
    }

    fn c_string(memory: &StubMemory, s: &str) -> i32 {
        let ptr = memory.alloc(s.len() + 1).unwrap();
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        memory.write(ptr, &bytes).unwrap();
        ptr as i32
    }

    #[tokio::test]
    async fn abort_fails_the_call_with_location() {
        let imports = env();
        let memory = StubMemory::new(1);
        let msg = c_string(&memory, "index out of range");
        let file = c_string(&memory, "assembly/index.ts");

        let err = imports
            .get(ENV_GROUP, "abort")
            .unwrap()
            .call(
                "env.abort",
                &HostCall::new(&memory),
                &[Value::I32(msg), Value::I32(file), Value::I32(12), Value::I32(7)],
            )
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("index out of range"));
        assert!(text.contains("assembly/index.ts:12:7"));
    }

    #[tokio::test]
    async fn trace_accepts_numeric_args() {
        let imports = env();
        let memory = StubMemory::new(1);
        let msg = c_string(&memory, "tick");
        let results = imports
            .get(ENV_GROUP, "trace")
            .unwrap()
            .call(
                "env.trace",
                &HostCall::new(&memory),
                &[
                    Value::I32(msg),
                    Value::I32(2),
                    Value::F64(1.5),
                    Value::F64(2.5),
                    Value::F64(0.0),
                    Value::F64(0.0),
                    Value::F64(0.0),
                ],
            )
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn seed_is_positive() {
        let imports = env();
        let memory = StubMemory::new(1);
        let results = imports
            .get(ENV_GROUP, "seed")
            .unwrap()
            .call("env.seed", &HostCall::new(&memory), &[])
            .unwrap();
        assert!(results[0].as_f64().unwrap() > 0.0);
    }
}
