//! End-to-end smoke tests live in `tests/`; this crate has no library code.
