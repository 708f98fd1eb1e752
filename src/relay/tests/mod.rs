//! Unit tests for the relay, organized by concern.

mod lifecycle;
mod submit;
