pub mod mailer;
pub mod otp;
pub mod quota;
pub mod reporting;
pub mod scan_service;
pub mod scanner;
pub mod verdict;
pub mod worker;
