pub mod embedding;
pub mod error;
pub mod redis;
pub mod transcribe;
pub mod vectordb;
