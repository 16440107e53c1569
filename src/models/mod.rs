pub mod price;
pub mod response;
pub mod payment;

pub use price::*;
pub use response::*;
pub use payment::*;
