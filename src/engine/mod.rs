pub mod availability;
pub mod matching;
pub mod notify;
pub mod orders;
pub mod scoring;
pub mod settlement;
