//! # tds-wire
//!
//! Pure implementation of the MS-TDS (Tabular Data Stream) wire protocol
//! spoken by Microsoft SQL Server: packet headers, request message builders
//! (Prelogin, Login7, SQLBatch, RPC, Transaction Manager), the response
//! token grammar, and value codecs for the SQL type system.
//!
//! The crate is IO-agnostic: nothing in here touches a socket or assumes an
//! async runtime. `sqlserver-framing` layers packet transport on top, and
//! `sqlserver-client` drives the request/response protocol.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod batch;
pub mod codec;
pub mod collation;
pub mod decode;
pub mod encode;
pub mod error;
pub mod headers;
pub mod login;
pub mod meta;
pub mod packet;
pub mod prelogin;
pub mod rpc;
pub mod tm;
pub mod token;
pub mod types;
pub mod value;

pub use batch::encode_batch;
pub use collation::Collation;
pub use error::WireError;
pub use login::Login7;
pub use meta::{ColumnMeta, TypeMeta};
pub use packet::{
    PacketHeader, PacketStatus, PacketType, DEFAULT_PACKET_SIZE, HEADER_LEN, MAX_PACKET_SIZE,
    MIN_PACKET_SIZE,
};
pub use prelogin::{Encryption, Prelogin, TDS_7_4};
pub use rpc::{Param, ParamDirection, ProcId, RpcRequest};
pub use tm::{IsolationLevel, TmRequest};
pub use token::{
    Done, DoneStatus, EnvChange, LoginAck, ReturnValue, ServerMessage, Token, TokenReader,
    TokenTag,
};
pub use types::{ColumnFlags, DataType};
pub use value::Value;
