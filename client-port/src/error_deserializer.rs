//! The user-supplied deserializer for remote errors.
//!
//! A server's `SerializedError` is opaque to the port; turning it into a
//! language-native error, and deciding what to do with its stack, is left to
//! the embedding application. [`DefaultErrorDeserializer`] is a ready-to-use
//! fallback so the crate works out of the box without every caller having
//! to supply one.

use client_port_core::{RemoteError, SerializedError};
use std::sync::Arc;

/// Turns a wire-format [`SerializedError`] plus the captured client stack
/// into a boxed, language-native error.
pub trait ErrorDeserializer: Send + Sync {
    fn deserialize(
        &self,
        error: SerializedError,
        stack: String,
    ) -> Arc<dyn std::error::Error + Send + Sync>;
}

/// Produces a [`RemoteError`] carrying the given stack. This is what you get
/// if you don't supply your own `ErrorDeserializer`.
pub struct DefaultErrorDeserializer;

impl ErrorDeserializer for DefaultErrorDeserializer {
    fn deserialize(
        &self,
        error: SerializedError,
        stack: String,
    ) -> Arc<dyn std::error::Error + Send + Sync> {
        Arc::new(RemoteError::from_wire(error, stack))
    }
}
