pub mod config;
pub mod connection;
pub mod control;
pub mod entry;
pub mod error;
pub mod ldap_protocol;
pub mod search;
pub mod stream;
pub mod tls;

#[cfg(test)]
mod test_server;

pub use config::Config;
pub use connection::{
    ConnectOptions, Connection, ConnectionState, LDAP_OPT_DEREF, LDAP_OPT_PROTOCOL_VERSION,
    LDAP_OPT_SIZELIMIT, LDAP_OPT_TIMELIMIT, LDAP_VERSION2, LDAP_VERSION3,
};
pub use control::Control;
pub use entry::{Attribute, Entry, SearchResult};
pub use error::{describe, LdapError, Result};
pub use ldap_protocol::SearchScope;
pub use search::SearchRequest;
