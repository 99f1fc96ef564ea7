//! Message protocol between page contexts and the worker.

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// Page context → worker. Fire-and-forget: the only replies are broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// Run the background prefetch pipeline over the given assets
    #[serde(alias = "cache-rest")]
    PrefetchManifest {
        #[serde(default)]
        assets: Vec<String>,
    },
    /// Make `url` the preferred media item, preempting any running prefetch
    #[serde(alias = "set-preferred-music")]
    SetPreferredMedia { url: String },
    /// Forget the preferred media item
    #[serde(alias = "clear-preferred-music")]
    ClearPreferredMedia,
}

impl WorkerMessage {
    pub fn from_json(raw: &str) -> Result<Self, WorkerError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::PrefetchManifest { .. } => "prefetch-manifest",
            WorkerMessage::SetPreferredMedia { .. } => "set-preferred-media",
            WorkerMessage::ClearPreferredMedia => "clear-preferred-media",
        }
    }
}

/// Worker → every page context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// A prefetch run finished or was abandoned
    BackgroundCacheComplete,
    /// Diagnostic trace, only sent when the worker is verbose
    Debug {
        level: String,
        msg: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        // Plain enums of strings always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_messages() {
        assert_eq!(
            WorkerMessage::from_json(r#"{"type":"prefetch-manifest","assets":["a","b"]}"#)
                .unwrap(),
            WorkerMessage::PrefetchManifest {
                assets: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(
            WorkerMessage::from_json(r#"{"type":"set-preferred-media","url":"assets/media/a.mp3"}"#)
                .unwrap(),
            WorkerMessage::SetPreferredMedia {
                url: "assets/media/a.mp3".into()
            }
        );
        assert_eq!(
            WorkerMessage::from_json(r#"{"type":"clear-preferred-media"}"#).unwrap(),
            WorkerMessage::ClearPreferredMedia
        );
    }

    #[test]
    fn test_decode_legacy_aliases() {
        assert_eq!(
            WorkerMessage::from_json(r#"{"type":"cache-rest"}"#).unwrap(),
            WorkerMessage::PrefetchManifest { assets: vec![] }
        );
        assert_eq!(
            WorkerMessage::from_json(r#"{"type":"set-preferred-music","url":"x.mp3"}"#).unwrap(),
            WorkerMessage::SetPreferredMedia { url: "x.mp3".into() }
        );
    }

    #[test]
    fn test_malformed_messages_are_errors() {
        assert!(WorkerMessage::from_json("not json").is_err());
        assert!(WorkerMessage::from_json(r#"{"type":"unknown"}"#).is_err());
        assert!(WorkerMessage::from_json(r#"{"type":"prefetch-manifest","assets":"a"}"#).is_err());
        assert!(WorkerMessage::from_json(r#"{"type":"set-preferred-media"}"#).is_err());
    }

    #[test]
    fn test_encode_client_messages() {
        assert_eq!(
            ClientMessage::BackgroundCacheComplete.to_json(),
            r#"{"type":"background-cache-complete"}"#
        );
        let debug = ClientMessage::Debug {
            level: "warn".into(),
            msg: "retries exhausted".into(),
            url: None,
        };
        assert_eq!(
            debug.to_json(),
            r#"{"type":"debug","level":"warn","msg":"retries exhausted"}"#
        );
    }
}
