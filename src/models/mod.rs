// Data models for the tool protocol and Google APIs

pub mod drive;
pub mod mcp;
pub mod sheets;
