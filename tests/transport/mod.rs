//! Control API transport tests.
