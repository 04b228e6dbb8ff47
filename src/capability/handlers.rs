//! Host-invoked plugin entry points.
//!
//! Guests implementing the plugin interface export `handleEvent` and,
//! optionally, `rewriteHeaders`. Both take a request handle and return a
//! response handle the guest registered.

use super::HostTrait;
use crate::error::{Result, SandboxError};
use crate::interop::{
    consume_message, send_message, Event, HandleEventRequest, HandleEventResponse,
    InteropMessage, RewriteHeadersRequest, RewriteHeadersResponse,
};
use crate::pool::ExecutionContext;
use crate::runtime::{GuestInstance, ImportNamespace, Value};
use std::collections::HashMap;

/// Required guest export handling events.
pub const HANDLE_EVENT_EXPORT: &str = "handleEvent";

/// Optional guest export rewriting request headers.
pub const REWRITE_HEADERS_EXPORT: &str = "rewriteHeaders";

/// Checks at build time that the guest implements the plugin interface.
///
/// `rewriteHeaders` is looked up per call by [`rewrite_headers`].
#[derive(Debug, Default)]
pub struct HandlersTrait;

impl HandlersTrait {
    /// Creates an unbound trait.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostTrait for HandlersTrait {
    fn export_to_guest(&self, _imports: &mut ImportNamespace) -> Result<()> {
        Ok(())
    }

    fn import_from_guest(&mut self, instance: &dyn GuestInstance) -> Result<()> {
        instance.function(HANDLE_EVENT_EXPORT)?;
        tracing::debug!(
            rewrites_headers = instance.has_function(REWRITE_HEADERS_EXPORT),
            "Plugin handlers bound"
        );
        Ok(())
    }
}

/// Passes `event` to the guest's `handleEvent` and returns the event the
/// guest sent back, if it modified it.
///
/// # Errors
///
/// Returns a call error if the guest reports failure, plus any error of
/// [`ExecutionContext::execute`] or of decoding the response.
pub async fn handle_event(ectx: &mut ExecutionContext, event: Event) -> Result<Option<Event>> {
    let request = HandleEventRequest { event: Some(event) };
    let response: HandleEventResponse = round_trip(ectx, HANDLE_EVENT_EXPORT, &request).await?;
    if !response.success {
        return Err(SandboxError::call_failed(HANDLE_EVENT_EXPORT, response.error));
    }
    Ok(response.event)
}

/// Passes `headers` to the guest's `rewriteHeaders` and returns the
/// rewritten map. Guests without the export get `headers` back unchanged.
///
/// # Errors
///
/// Same as [`handle_event`].
pub async fn rewrite_headers(
    ectx: &mut ExecutionContext,
    headers: HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    if !ectx.has_function(REWRITE_HEADERS_EXPORT) {
        return Ok(headers);
    }
    let request = RewriteHeadersRequest { headers };
    let response: RewriteHeadersResponse =
        round_trip(ectx, REWRITE_HEADERS_EXPORT, &request).await?;
    if !response.success {
        return Err(SandboxError::call_failed(REWRITE_HEADERS_EXPORT, response.error));
    }
    Ok(response.headers)
}

async fn round_trip<Req, Resp>(ectx: &mut ExecutionContext, export: &str, request: &Req) -> Result<Resp>
where
    Req: InteropMessage,
    Resp: InteropMessage,
{
    let function = ectx.function(export)?;
    let request_handle = send_message(ectx.handle(), request)?;
    let results = ectx.execute(&function, vec![Value::I32(request_handle)]).await;

    // An abandoned call may still be reading the request.
    if !ectx.has_call_in_flight() {
        ectx.handle().discard_buffer(request_handle);
    }

    match results?.as_slice() {
        [Value::I32(response_handle)] => consume_message(ectx.handle(), *response_handle),
        _ => Err(SandboxError::call_failed(
            export,
            "expected a single i32 response handle",
        )),
    }
}
