pub mod chrome;
pub mod login;
pub mod scripts;
pub mod session;
pub mod snapshot;

pub use chrome::{ChromeBrowser, ChromeSession};
pub use login::login_to_portal;
pub use session::{By, Element, Session};
pub use snapshot::HtmlSession;
