//! Low-level wire primitives shared by the container codecs.

pub mod vli;

pub use vli::{read_vli, read_vli_slice, vli_len, write_vli};
