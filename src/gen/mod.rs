//! Downstream emitters consuming the target record stream.

pub mod ninja;
