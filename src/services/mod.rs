pub mod gpx;
pub mod openweather;
pub mod provider;
pub mod rate_limiter;
pub mod resolver;
pub mod sampler;
pub mod weather;
pub mod yr;
