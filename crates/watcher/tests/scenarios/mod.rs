//! Watch scenarios
//!
//! `mirror` drives a real native backend over a temporary tree; `manual`
//! injects notifications by hand for exact control over event timing.

pub mod manual;
pub mod mirror;
