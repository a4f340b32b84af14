mod archive;
pub use archive::*;
mod json;
pub use json::*;
