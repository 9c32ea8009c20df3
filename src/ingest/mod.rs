pub mod archive;
pub mod builder;
pub mod detector;
pub mod diagnostics;
pub mod hasher;
pub mod normalizer;
pub mod scanner;

pub use builder::RecordBuilder;
pub use scanner::Scanner;
