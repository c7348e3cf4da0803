//! # thermo-codec
//!
//! Pull-based byte codecs for the incremental response engine.
//!
//! This crate provides:
//! - [`gzip::GzipDecoder`] - streaming gzip decompression over a fixed byte
//!   range or an arbitrary reader, resumable across any number of small
//!   "give me up to N more bytes" calls
//! - [`template`] - incremental `$NAME$` placeholder substitution with an
//!   up-front exact output length
//!
//! Both codecs never hold a full decoded output in memory and never let an
//! error escape a pull call; failures are logged and latch the codec into its
//! finished state.

pub mod gzip;
pub mod template;

pub use gzip::{CodecError, GzipDecoder};
pub use template::{Fill, TemplateFiller, TEMPLATE_CHAR};
