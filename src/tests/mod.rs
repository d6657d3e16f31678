//! Crate-level tests that exercise several modules together.

mod frame_properties;
