//! Layer primitives: initialization, convolution, pooling, dense layers,
//! and the elementwise operations they share.
//!
//! The architecture is fixed, so there is no autograd tape; each primitive
//! exposes an explicit forward and backward function and the model chains
//! them by hand.

pub mod conv;
pub mod dense;
pub mod init;
pub mod ops;
