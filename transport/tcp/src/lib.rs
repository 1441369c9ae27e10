#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # cocaine-tcp
//!
//! This crate provides the TCP transport for [`cocaine-channel`](cocaine_channel).
//! It is used for the locator and every resolved service.

mod client;
pub use client::*;
