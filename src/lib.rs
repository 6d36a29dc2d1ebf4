//! planbbr - Danish plan polygons from Plandata and the BBR buildings inside them

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod output;
pub mod pipeline;
