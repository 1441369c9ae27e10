#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # cocaine-codec
//!
//! Every message on a cocaine connection is one msgpack array
//! `[session, message_type, payload, headers?]`, concatenated on the stream without any
//! length prefix. This crate encodes such frames and cuts them back out of the byte stream.

mod frame;
pub use frame::*;
mod msgpack;
pub use msgpack::*;
