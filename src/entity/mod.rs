pub mod helpers;
pub mod login_log;
pub mod persons;
pub mod relationships;
pub mod shared_password;
