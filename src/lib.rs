pub mod align;
pub mod analysis;
pub mod bam;
pub mod config;
pub mod domain;
pub mod ena;
pub mod error;
pub mod fetcher;
pub mod index;
pub mod layout;
pub mod merge;
pub mod output;
pub mod project;
pub mod sample;
pub mod tool;
pub mod transport;
