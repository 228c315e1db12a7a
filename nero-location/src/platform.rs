use tokio::sync::mpsc;

use crate::{
    config::PositionOptions,
    coordinate::Coordinate,
    error::PlatformError,
    permission::PermissionStatus,
};

/// Opaque handle for a continuous platform subscription
pub type WatchId = u32;

/// A single reading (or failure) from a continuous subscription
pub type WatchReading = Result<Coordinate, PlatformError>;

/// Where the platform pushes readings for a subscription, in the order it produces them
pub type WatchSink = mpsc::UnboundedSender<WatchReading>;

/// The device's geolocation capability
pub trait GeoPlatform: Send + Sync {
    /// Whether the device can provide locations at all
    fn has_geolocation(&self) -> bool {
        true
    }
    /// Whether we're running somewhere the platform will hand out locations (HTTPS / localhost)
    fn is_secure_context(&self) -> bool;
    /// Ask the platform what it currently thinks of our location permission
    fn permission_status(&self) -> impl Future<Output = PermissionStatus> + Send;
    /// Request a single fix
    fn get_current_position(
        &self,
        options: PositionOptions,
    ) -> impl Future<Output = Result<Coordinate, PlatformError>> + Send;
    /// Open a continuous subscription, readings go to `sink` until [GeoPlatform::clear_watch]
    fn watch_position(&self, options: PositionOptions, sink: WatchSink)
    -> Result<WatchId, PlatformError>;
    /// Close a continuous subscription
    fn clear_watch(&self, id: WatchId);
}

/// Whether `origin` (e.g. `https://example.com:8080`) is somewhere location access is allowed
pub fn is_secure_origin(origin: &str) -> bool {
    let Some((scheme, rest)) = origin.split_once("://") else {
        return false;
    };

    if scheme.eq_ignore_ascii_case("https") {
        return true;
    }

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if authority.starts_with('[') {
        authority
            .split_once(']')
            .map_or(authority, |(h, _)| h.trim_start_matches('['))
    } else {
        authority.split(':').next().unwrap_or_default()
    };

    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_origins() {
        assert!(is_secure_origin("https://nero.example"));
        assert!(is_secure_origin("HTTPS://nero.example/explore"));
        assert!(is_secure_origin("http://localhost:5173"));
        assert!(is_secure_origin("http://127.0.0.1/detail?id=3"));
        assert!(is_secure_origin("http://[::1]:8080"));
        assert!(is_secure_origin("tauri://localhost"));
    }

    #[test]
    fn test_insecure_origins() {
        assert!(!is_secure_origin("http://nero.example"));
        assert!(!is_secure_origin("http://localhost.evil.example"));
        assert!(!is_secure_origin("nero.example"));
        assert!(!is_secure_origin("http://user@nero.example"));
    }
}
