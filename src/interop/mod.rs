//! Host/guest message interop: handles, guest memory access and the
//! protobuf bridge.

mod bridge;
mod handles;
mod memory;
mod messages;

pub use bridge::{consume_message, receive_message, send_message, InteropTrait, INTEROP_GROUP};
pub use handles::{Buffer, HandleTable, MAX_HANDLES};
pub use memory::{guest_usize, read_guest_bytes, write_guest_bytes, StringDecoder, MAX_C_STRING};
pub use messages::{
    Event, HandleEventRequest, HandleEventResponse, InteropMessage, RewriteHeadersRequest,
    RewriteHeadersResponse,
};
