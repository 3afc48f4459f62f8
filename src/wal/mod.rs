pub mod frame;
pub mod print;
pub mod reader;
pub mod segment;
