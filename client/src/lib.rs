pub mod config;
pub mod encoding;
pub mod exchange;
pub mod outcome;
pub mod responder;
pub mod sampler;

pub use exchange::ExchangeRunner;
pub use mqmeter_common as common;
pub use sampler::Sampler;
