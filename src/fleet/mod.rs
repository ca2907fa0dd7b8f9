pub mod command;
pub mod constants;
pub mod motion;
pub mod ship;
