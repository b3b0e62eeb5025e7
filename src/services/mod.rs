pub mod batch;
pub mod project;
pub mod repository;
pub mod tts;
