//! Moves protobuf messages across the sandbox boundary under handles.
//!
//! Guests hand the host a message by copying it into a host buffer with
//! `interop.registerBuffer` and passing the returned handle around. The
//! host hands a guest a message by encoding it into a buffer with
//! [`send_message`]; the guest sizes it with `interop.bufferSize` and copies
//! it out with `interop.readBuffer`.

use super::memory::{read_guest_bytes, write_guest_bytes};
use super::InteropMessage;
use crate::capability::HostTrait;
use crate::error::{Result, SandboxError};
use crate::pool::ContextHandle;
use crate::runtime::{i32_arg, FunctionType, HostFunction, ImportNamespace, Value, ValueType};
use bytes::Bytes;

/// Import group of the interop host functions.
pub const INTEROP_GROUP: &str = "interop";

/// Encodes `message` into a new buffer tagged with its type and returns
/// the handle.
///
/// # Errors
///
/// Fails when the context's handle table is full.
pub fn send_message<M: InteropMessage>(ctx: &ContextHandle, message: &M) -> Result<i32> {
    let bytes = Bytes::from(message.encode_to_vec());
    ctx.register_buffer(bytes, Some(M::TYPE))
}

/// Decodes the buffer behind `handle` as `M`, leaving the handle live.
///
/// Buffers registered by the guest carry no type and are decoded as
/// whatever the host expects.
///
/// # Errors
///
/// Returns a stale handle error for unknown handles, an invalid argument
/// error if the host tagged the buffer with another type, and a decode
/// error if the bytes are not a valid `M`.
pub fn receive_message<M: InteropMessage>(ctx: &ContextHandle, handle: i32) -> Result<M> {
    let buffer = ctx.resolve_buffer(handle)?;
    if let Some(actual) = buffer.message_type {
        if actual != M::TYPE {
            return Err(SandboxError::invalid_argument(
                "handle",
                format!("holds a {actual}, expected a {}", M::TYPE),
            ));
        }
    }
    M::decode(buffer.bytes)
        .map_err(|e| SandboxError::decode_failed(M::TYPE, e.to_string()).with_source(e))
}

/// Like [`receive_message`], but discards the handle whether or not
/// decoding succeeds.
///
/// # Errors
///
/// Same as [`receive_message`].
pub fn consume_message<M: InteropMessage>(ctx: &ContextHandle, handle: i32) -> Result<M> {
    let message = receive_message(ctx, handle);
    ctx.discard_buffer(handle);
    message
}

/// Guest-facing buffer functions for one execution context.
#[derive(Debug)]
pub struct InteropTrait {
    ctx: ContextHandle,
}

impl InteropTrait {
    /// Binds the trait to `ctx`.
    #[must_use]
    pub fn new(ctx: ContextHandle) -> Self {
        Self { ctx }
    }
}

impl HostTrait for InteropTrait {
    fn export_to_guest(&self, imports: &mut ImportNamespace) -> Result<()> {
        let ctx = self.ctx.clone();
        let register_buffer = HostFunction::new(
            FunctionType::new([ValueType::I32, ValueType::I32], [ValueType::I32]),
            move |call, args| {
                let ptr = i32_arg(args, 0, "ptr")?;
                let len = i32_arg(args, 1, "len")?;
                let bytes = read_guest_bytes(call.memory(), ptr, len)?;
                let handle = ctx.register_buffer(Bytes::from(bytes), None)?;
                tracing::trace!(slot = ctx.slot(), handle, len, "Guest registered buffer");
                Ok(vec![Value::I32(handle)])
            },
        );

        let ctx = self.ctx.clone();
        let buffer_size = HostFunction::new(
            FunctionType::new([ValueType::I32], [ValueType::I32]),
            move |_call, args| {
                let handle = i32_arg(args, 0, "handle")?;
                let buffer = ctx.resolve_buffer(handle)?;
                let len = i32::try_from(buffer.bytes.len())
                    .map_err(|_| SandboxError::invalid_argument("handle", "buffer too large"))?;
                Ok(vec![Value::I32(len)])
            },
        );

        let ctx = self.ctx.clone();
        let read_buffer = HostFunction::new(
            FunctionType::new([ValueType::I32, ValueType::I32], []),
            move |call, args| {
                let handle = i32_arg(args, 0, "handle")?;
                let ptr = i32_arg(args, 1, "ptr")?;
                let buffer = ctx.resolve_buffer(handle)?;
                write_guest_bytes(call.memory(), ptr, &buffer.bytes)?;
                Ok(Vec::new())
            },
        );

        let ctx = self.ctx.clone();
        let discard_buffer = HostFunction::new(
            FunctionType::new([ValueType::I32], []),
            move |_call, args| {
                let handle = i32_arg(args, 0, "handle")?;
                ctx.discard_buffer(handle);
                Ok(Vec::new())
            },
        );

        imports.register(
            INTEROP_GROUP,
            [
                ("registerBuffer", register_buffer),
                ("bufferSize", buffer_size),
                ("readBuffer", read_buffer),
                ("discardBuffer", discard_buffer),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::{Event, HandleEventRequest, RewriteHeadersRequest};
    use crate::runtime::{HostCall, LinearMemory, StubMemory};

    fn context() -> ContextHandle {
        ContextHandle::new(0, tokio::runtime::Handle::current())
    }

    fn interop(ctx: &ContextHandle) -> ImportNamespace {
        let mut imports = ImportNamespace::new();
        InteropTrait::new(ctx.clone())
            .export_to_guest(&mut imports)
            .unwrap();
        imports
    }

    fn call(imports: &ImportNamespace, memory: &StubMemory, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        let function = imports.get(INTEROP_GROUP, name).unwrap();
        function.call(name, &HostCall::new(memory), args)
    }

    #[tokio::test]
    async fn send_then_receive_same_type() {
        let ctx = context();
        let request = HandleEventRequest {
            event: Some(Event {
                code: "T1000I".to_string(),
                ..Default::default()
            }),
        };
        let handle = send_message(&ctx, &request).unwrap();
        let decoded: HandleEventRequest = receive_message(&ctx, handle).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(ctx.live_handles(), 1);
    }

    #[tokio::test]
    async fn wrong_message_type_is_rejected() {
        let ctx = context();
        let handle = send_message(&ctx, &HandleEventRequest::default()).unwrap();
        let err = receive_message::<RewriteHeadersRequest>(&ctx, handle).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn consume_discards_even_on_decode_failure() {
        let ctx = context();
        let handle = ctx
            .register_buffer(Bytes::from_static(&[0xff, 0xff, 0xff]), None)
            .unwrap();
        assert!(consume_message::<Event>(&ctx, handle).is_err());
        assert_eq!(ctx.live_handles(), 0);
    }

    #[tokio::test]
    async fn guest_buffer_round_trip() {
        let ctx = context();
        let imports = interop(&ctx);
        let memory = StubMemory::new(1);

        let src = memory.alloc(5).unwrap();
        memory.write(src, b"hello").unwrap();
        let handle = call(
            &imports,
            &memory,
            "registerBuffer",
            &[Value::I32(src as i32), Value::I32(5)],
        )
        .unwrap()[0]
            .as_i32()
            .unwrap();

        let size = call(&imports, &memory, "bufferSize", &[Value::I32(handle)]).unwrap();
        assert_eq!(size, vec![Value::I32(5)]);

        let dst = memory.alloc(5).unwrap();
        call(
            &imports,
            &memory,
            "readBuffer",
            &[Value::I32(handle), Value::I32(dst as i32)],
        )
        .unwrap();
        let mut out = [0u8; 5];
        memory.read(dst, &mut out).unwrap();
        assert_eq!(&out, b"hello");

        call(&imports, &memory, "discardBuffer", &[Value::I32(handle)]).unwrap();
        assert!(call(&imports, &memory, "bufferSize", &[Value::I32(handle)]).is_err());
    }

    #[tokio::test]
    async fn register_past_memory_end_is_out_of_bounds() {
        let ctx = context();
        let imports = interop(&ctx);
        let memory = StubMemory::new(1);
        let err = call(
            &imports,
            &memory,
            "registerBuffer",
            &[Value::I32(65_530), Value::I32(100)],
        )
        .unwrap_err();
        assert!(err.is_out_of_bounds());
        assert_eq!(ctx.live_handles(), 0);
    }
}
