use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Path appended to a machine's endpoint to reach its event socket.
pub const DEFAULT_EVENTS_PATH: &str = "comfyui-deploy/ws";

/// A watched machine. Owned by whoever supplies the inventory; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDescriptor {
    pub id: String,
    pub name: String,
    /// HTTP(S) base URL of the machine.
    pub endpoint: String,
}

impl MachineDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn events_url(&self, events_path: &str) -> Result<String, EndpointError> {
        events_url(&self.endpoint, events_path)
    }
}

/// Derive the event socket URL for an endpoint.
///
/// `http` becomes `ws` and `https` becomes `wss`; endpoints that already use a
/// websocket scheme are kept as they are.
pub fn events_url(endpoint: &str, events_path: &str) -> Result<String, EndpointError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(EndpointError::Empty);
    }

    let Some((scheme, rest)) = endpoint.split_once("://") else {
        return Err(EndpointError::UnsupportedScheme(endpoint.to_string()));
    };
    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(EndpointError::UnsupportedScheme(endpoint.to_string())),
    };

    let base = rest.trim_end_matches('/');
    let path = events_path.trim_start_matches('/');
    Ok(format!("{}://{}/{}", ws_scheme, base, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_becomes_ws() {
        assert_eq!(
            events_url("http://10.0.0.5:8188", DEFAULT_EVENTS_PATH).unwrap(),
            "ws://10.0.0.5:8188/comfyui-deploy/ws"
        );
    }

    #[test]
    fn https_becomes_wss() {
        assert_eq!(
            events_url("https://gpu.example.com", DEFAULT_EVENTS_PATH).unwrap(),
            "wss://gpu.example.com/comfyui-deploy/ws"
        );
    }

    #[test]
    fn trailing_slashes_collapse() {
        assert_eq!(
            events_url("https://gpu.example.com/", "/events").unwrap(),
            "wss://gpu.example.com/events"
        );
    }

    #[test]
    fn websocket_schemes_pass_through() {
        assert_eq!(events_url("ws://a:1", "x").unwrap(), "ws://a:1/x");
        assert_eq!(events_url("WSS://a", "x").unwrap(), "wss://a/x");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(matches!(
            events_url("ftp://a", "x"),
            Err(EndpointError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            events_url("gpu.example.com", "x"),
            Err(EndpointError::UnsupportedScheme(_))
        ));
        assert_eq!(events_url("  ", "x"), Err(EndpointError::Empty));
    }

    #[test]
    fn descriptor_deserializes_from_json() {
        let m: MachineDescriptor = serde_json::from_str(
            r#"{"id":"m1","name":"Render box","endpoint":"http://localhost:8188"}"#,
        )
        .unwrap();
        assert_eq!(m.id, "m1");
        assert_eq!(
            m.events_url(DEFAULT_EVENTS_PATH).unwrap(),
            "ws://localhost:8188/comfyui-deploy/ws"
        );
    }
}
