//! Intermediate operators.
//!
//! Each operator wraps the flow it is called on in a new stage and returns
//! the wrapped flow. Nothing runs until a terminal operator collects.

pub(crate) mod catch;
pub(crate) mod channel;
pub(crate) mod combine;
pub(crate) mod latest;
pub(crate) mod merge;
pub(crate) mod take;
pub(crate) mod transform;
pub(crate) mod zip;
