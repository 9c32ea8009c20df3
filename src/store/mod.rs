pub mod ledger;
pub mod segments;

pub use ledger::ResumeLedger;
pub use segments::OutputRotator;
