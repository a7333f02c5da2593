pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod reporter;
pub mod session;
pub mod state;
pub mod types;

/// VRChat REST API base URL
pub const API_BASE: &str = "https://api.vrchat.cloud/api/1";

/// Cookie domain used for session cookies the API sets without an explicit domain
pub const API_COOKIE_DOMAIN: &str = "api.vrchat.cloud";

/// Public launch page; `worldId` (and optionally `instanceId`) are appended
pub const LAUNCH_URL: &str = "https://vrchat.com/home/launch";
