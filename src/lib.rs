pub mod background;
pub mod buffer;
pub mod capture;
pub mod engine;
pub mod gate;
pub mod pipeline;
pub mod sink;
