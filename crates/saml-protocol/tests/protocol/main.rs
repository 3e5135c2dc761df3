//! Protocol integration tests.
//!
//! These tests exercise the public API end to end: messages are built,
//! signed, carried over both bindings and checked against metadata, using
//! keys and certificates generated in-process.

mod bindings;
mod common;
mod resolution;
mod signatures;
