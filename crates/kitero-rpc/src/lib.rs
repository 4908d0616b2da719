mod methods;
mod protocol;
mod server;

pub use protocol::{decode_request, encode_result, ProtocolError};
pub use server::{RpcServer, ServerError};
