mod check;
mod config;
mod resolver;
mod url;

pub use check::{HttpCheck, ImageCheck};
pub use config::ImageConfig;
pub use resolver::{ImageResolver, ImageSource, ResolvedImage};
pub use url::{encode_uri_component, storage_url};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
