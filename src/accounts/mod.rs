pub mod admin;
pub mod book;
pub mod credentials;

pub use admin::AdminAuth;
pub use book::AccountBook;
