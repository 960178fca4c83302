pub mod app;
pub mod effects;
pub mod gateway;
pub mod ui;
