pub mod health;
pub mod metrics;
pub mod price;

pub use health::*;
pub use metrics::*;
pub use price::*;
