pub mod frame;
pub mod link;
pub mod parser;
