pub mod archive;
pub mod kubernetes;
pub mod runners;
