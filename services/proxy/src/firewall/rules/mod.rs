//! Concrete filters

pub mod cookie_checkpoint;
pub mod dos_detector;
pub mod ip_filter;
pub mod sensitive_urls;
pub mod static_files;

pub use cookie_checkpoint::CookieCheckpoint;
pub use dos_detector::DosFilter;
pub use ip_filter::IpFilter;
pub use sensitive_urls::SensitiveUrlFilter;
pub use static_files::StaticFileFilter;
