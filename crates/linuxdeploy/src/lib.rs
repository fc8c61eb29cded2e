pub mod blacklist;
pub mod deploy;
pub mod error;
pub mod ldd;
pub mod logging;
pub mod qt;
pub mod tools;

pub use deploy::{AppDeployer, DeployConfig};
pub use error::{Error, Result};
