use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// ICE candidate as exchanged with the signaling server (browser JSON shape)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

/// Configured ICE server (stun or turn)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.to_owned(),
            r#type: "stun".into(),
            url: url.to_owned(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(id: &str, url: &str, username: &str, credential: &str) -> Self {
        Self {
            id: id.to_owned(),
            r#type: "turn".into(),
            url: url.to_owned(),
            username: Some(username.to_owned()),
            credential: Some(credential.to_owned()),
        }
    }
}

/// `urls` may arrive as a single string or a list
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(u) => vec![u.clone()],
            IceUrls::Many(v) => v.clone(),
        }
    }
}

/// ICE server entry pushed by the media server inside an offer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteIceServer {
    pub urls: IceUrls,
    #[serde(default, alias = "user_name")]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Resolved ICE server handed to the peer connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_uses_browser_field_names() {
        let json = r#"{"candidate":"candidate:1 1 UDP 2122252543 10.0.0.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let c: IceCandidate = serde_json::from_str(json).expect("browser candidate");
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));

        let back = serde_json::to_value(&c).unwrap();
        assert!(back.get("sdpMLineIndex").is_some());
        assert!(back.get("usernameFragment").is_none());
    }

    #[test]
    fn remote_ice_server_accepts_single_url_and_user_name_alias() {
        let json = r#"{"urls":"turn:203.0.113.5:3478?transport=tcp","user_name":"ome","credential":"airen"}"#;
        let s: RemoteIceServer = serde_json::from_str(json).unwrap();
        assert_eq!(s.urls.to_vec(), vec!["turn:203.0.113.5:3478?transport=tcp"]);
        assert_eq!(s.username.as_deref(), Some("ome"));
    }
}
