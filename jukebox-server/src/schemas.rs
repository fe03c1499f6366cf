use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    Json,
};
use jukebox_collab::{Command, CommandEnvelope, ConnectionId};
use jukebox_core::{RoomId, TrackRef};
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CommandAction {
    Enqueue,
    Dequeue,
    Upvote,
    Downvote,
    RetractVote,
    SwapVote,
    Play,
    Pause,
    Stop,
    Skip,
    GetState,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandSchema {
    /// The user acting
    #[validate(range(min = 1))]
    pub user_id: i32,
    /// The id received in the `connected` event, failures are reported to that stream
    pub connection_id: Option<u64>,
    pub action: CommandAction,
    /// Required by every action acting on a single song
    #[validate(length(min = 1, max = 128))]
    pub track_ref: Option<String>,
}

impl CommandSchema {
    pub fn into_envelope(self, room_id: RoomId) -> Result<CommandEnvelope, ServerError> {
        let track_ref = || {
            self.track_ref
                .clone()
                .map(TrackRef::new)
                .ok_or_else(|| ServerError::InvalidBody("trackRef is required".to_string()))
        };

        let command = match self.action {
            CommandAction::Enqueue => Command::Enqueue {
                track_ref: track_ref()?,
            },
            CommandAction::Dequeue => Command::Dequeue {
                track_ref: track_ref()?,
            },
            CommandAction::Upvote => Command::Upvote {
                track_ref: track_ref()?,
            },
            CommandAction::Downvote => Command::Downvote {
                track_ref: track_ref()?,
            },
            CommandAction::RetractVote => Command::RetractVote {
                track_ref: track_ref()?,
            },
            CommandAction::SwapVote => Command::SwapVote {
                track_ref: track_ref()?,
            },
            CommandAction::Play => Command::Play,
            CommandAction::Pause => Command::Pause,
            CommandAction::Stop => Command::Stop,
            CommandAction::Skip => Command::Skip,
            CommandAction::GetState => Command::GetState,
        };

        Ok(CommandEnvelope {
            room_id,
            user_id: self.user_id,
            connection_id: self.connection_id.map(ConnectionId::from_value),
            command,
        })
    }
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ServerError::InvalidBody(e.body_text()))?;

        extracted_json
            .0
            .validate()
            .map_err(|e| ServerError::InvalidBody(e.to_string()))?;

        Ok(Self(extracted_json.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> CommandSchema {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_song_actions_need_a_track() {
        let schema = parse(r#"{ "userId": 1, "action": "upvote" }"#);

        assert!(matches!(
            schema.into_envelope(1),
            Err(ServerError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_builds_envelope() {
        let schema = parse(
            r#"{ "userId": 3, "connectionId": 12, "action": "swap-vote", "trackRef": "abc" }"#,
        );
        let envelope = schema.into_envelope(7).unwrap();

        assert_eq!(envelope.room_id, 7);
        assert_eq!(envelope.user_id, 3);
        assert_eq!(envelope.connection_id, Some(ConnectionId::from_value(12)));
        assert_eq!(
            envelope.command,
            Command::SwapVote {
                track_ref: TrackRef::new("abc")
            }
        );
    }

    #[test]
    fn test_rejects_invalid_bodies() {
        assert!(parse(r#"{ "userId": 0, "action": "play" }"#).validate().is_err());
        assert!(parse(r#"{ "userId": 1, "action": "play", "trackRef": "" }"#)
            .validate()
            .is_err());
        assert!(serde_json::from_str::<CommandSchema>(r#"{ "userId": 1, "action": "rewind" }"#)
            .is_err());
    }
}
