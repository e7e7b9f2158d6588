//! Bobbin CLI library - shared functionality for testing and binary.

pub mod inspect;
pub mod tensor_io;
pub mod validate;
