// src/ingest/providers/mod.rs
pub mod youtube;

pub use youtube::YouTubeSource;
