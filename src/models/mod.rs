//! Core data models for the conveyance layer.
//!
//! Addresses and keys, object records returned by stores, inbound file
//! sources and image variants. None of these types perform I/O except
//! [`file::InboundFile::resolve`], which reads local paths.

pub mod address;
pub mod file;
pub mod object;
pub mod variant;
