pub mod auth;
pub mod client_ip;
pub mod hash;
pub mod keyed_mutex;
pub mod rate_limit;
pub mod validation;
