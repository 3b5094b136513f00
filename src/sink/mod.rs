mod loopback;

pub use loopback::LoopbackSink;
