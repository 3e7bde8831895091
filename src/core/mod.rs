pub mod controller;
pub mod engine;
pub mod reliability;
pub mod stop;
