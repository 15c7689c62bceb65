pub mod chunker;
pub mod core;
pub mod imports;
pub mod languages;
pub mod resolve;
pub mod symbols;
