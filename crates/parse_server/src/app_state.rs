use storage::Storage;

use crate::ServerConfig;

pub(crate) struct AppState {
    pub(crate) config: ServerConfig,
    pub(crate) storage: Storage,
}

/// Privilege level established by the key headers of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Client,
    Master,
}
