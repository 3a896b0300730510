pub mod agent;
pub mod clock;
pub mod error;
pub mod incident;
pub mod officer;
pub mod orchestrator;
pub mod policy;
pub mod session;

pub use agent::*;
pub use clock::*;
pub use error::*;
pub use incident::*;
pub use officer::*;
pub use orchestrator::*;
pub use policy::*;
pub use session::*;
