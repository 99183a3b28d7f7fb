pub mod evaluation;
pub mod kinematics;
pub mod network;
pub mod prep;
pub mod scaler;
pub mod training;
pub mod types;
pub mod utils;

pub use evaluation::*;
pub use network::*;
pub use prep::*;
pub use scaler::*;
pub use training::*;
pub use types::*;
pub use utils::*;
