pub mod builder;
pub mod dataset;
pub mod event;
pub mod features;
pub mod labels;
pub mod models;
pub mod simulate;
pub mod store;
pub mod synth;
pub mod window;
