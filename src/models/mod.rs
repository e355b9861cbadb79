pub mod demand;
pub mod drone;
pub mod matching;
pub mod notification;
pub mod order;
pub mod payment;
