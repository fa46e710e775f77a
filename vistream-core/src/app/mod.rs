//! Apps, their registry and connection routing.

pub mod instance;
pub mod registry;
pub mod router;

pub use instance::{AppInfo, AppInstance};
pub use registry::AppRegistry;
pub use router::{
    Dispatch, RoutedSession, SessionRouter, UNKNOWN_APP_CLOSE_CODE, app_id_from_path,
};
