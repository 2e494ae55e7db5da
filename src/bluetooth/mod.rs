pub mod decoder;
pub mod scanner;
