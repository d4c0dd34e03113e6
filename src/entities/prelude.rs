pub use super::email_otps::Entity as EmailOtps;
pub use super::scans::Entity as Scans;
pub use super::users::Entity as Users;
