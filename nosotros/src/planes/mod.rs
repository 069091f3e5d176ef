pub mod control;
pub mod daily;
pub mod data;
