pub mod assembler;
pub mod channel;
