pub mod prelude;

pub mod email_otps;
pub mod scans;
pub mod users;
