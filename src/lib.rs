#![deny(nonstandard_style)]
#![deny(future_incompatible)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(unused)]

//! Ember's Render Hardware Interface.
//!
//! A thin, explicit, bindless abstraction over a modern low-level graphics
//! API. The centerpiece is a frame-scoped render graph which schedules GPU
//! jobs across up to three hardware queues, derives the required image and
//! buffer barriers from per-node resource accesses, and synchronizes the
//! queues with timeline semaphores.
//!
//! The asset pipeline, shader compiler front end, window layer and renderer
//! features live outside of this crate; they consume the RHI through the
//! types exported from [`rhi`].

pub mod rhi;
