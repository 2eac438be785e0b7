#[cfg(feature = "browser")]
pub mod browser;
pub mod http;
pub mod selector;

#[cfg(feature = "browser")]
pub use browser::BrowserEngine;
pub use http::HttpEngine;
pub use selector::SelectorParser;
