use crate::error::{Result, RpslsError};
use crate::types::{Address, Weapon, Winner};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TAG: &str = "_type";

const KNOWN_TAGS: [&str; 10] = [
    "Player1Address",
    "Player2Address",
    "Connected",
    "ContractAddress",
    "RequiredStake",
    "requiredStake",
    "Player1Choice",
    "Winner",
    "Player2Responded",
    "PeerTimedOut",
];

/// Everything the two players say to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum PeerMessage {
    Player1Address {
        address: Address,
    },
    Player2Address {
        address: Address,
    },
    Connected,
    ContractAddress {
        address: Address,
    },
    #[serde(alias = "requiredStake")]
    RequiredStake {
        /// Decimal ether string.
        #[serde(rename = "amountStaked")]
        amount_staked: String,
    },
    Player1Choice {
        choice: Weapon,
    },
    Winner {
        player: Winner,
    },
    Player2Responded,
    PeerTimedOut,
}

impl PeerMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            PeerMessage::Player1Address { .. } => "Player1Address",
            PeerMessage::Player2Address { .. } => "Player2Address",
            PeerMessage::Connected => "Connected",
            PeerMessage::ContractAddress { .. } => "ContractAddress",
            PeerMessage::RequiredStake { .. } => "RequiredStake",
            PeerMessage::Player1Choice { .. } => "Player1Choice",
            PeerMessage::Winner { .. } => "Winner",
            PeerMessage::Player2Responded => "Player2Responded",
            PeerMessage::PeerTimedOut => "PeerTimedOut",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one frame.
    ///
    /// Frames that are not tagged objects, or carry a tag this client does not
    /// know, yield `Ok(None)`. A known tag with a bad body is an error.
    pub fn decode(frame: &str) -> Result<Option<PeerMessage>> {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };

        let known = value
            .as_object()
            .and_then(|object| object.get(TAG))
            .and_then(Value::as_str)
            .map(|tag| KNOWN_TAGS.contains(&tag))
            .unwrap_or(false);
        if !known {
            return Ok(None);
        }

        let message: PeerMessage = serde_json::from_value(value)?;
        if let PeerMessage::Player1Choice { choice } = message {
            if !choice.is_playable() {
                return Err(RpslsError::InvalidMove(choice.code()));
            }
        }
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let message = PeerMessage::RequiredStake {
            amount_staked: "0.0001".to_string(),
        };
        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(value, json!({ "_type": "RequiredStake", "amountStaked": "0.0001" }));

        let value: Value =
            serde_json::from_str(&PeerMessage::Player2Responded.encode().unwrap()).unwrap();
        assert_eq!(value, json!({ "_type": "Player2Responded" }));

        let value: Value = serde_json::from_str(
            &PeerMessage::Winner {
                player: Winner::Draw,
            }
            .encode()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(value, json!({ "_type": "Winner", "player": "Draw" }));
    }

    #[test]
    fn test_decode_known_messages() {
        let message = PeerMessage::decode(
            r#"{"_type":"Player1Address","address":"0x00000000000000000000000000000000000000aa"}"#,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(message, PeerMessage::Player1Address { address } if address == Address::from_low_u64_be(0xaa)));

        let message = PeerMessage::decode(r#"{"_type":"Player1Choice","choice":3}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            PeerMessage::Player1Choice {
                choice: Weapon::Scissors
            }
        );

        // browser clients tag the stake message in camel case
        let message = PeerMessage::decode(r#"{"_type":"requiredStake","amountStaked":"0.5"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            PeerMessage::RequiredStake {
                amount_staked: "0.5".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_frames_are_ignored() {
        assert_eq!(PeerMessage::decode("hello there").unwrap(), None);
        assert_eq!(PeerMessage::decode(r#""hello there""#).unwrap(), None);
        assert_eq!(PeerMessage::decode(r#"{"_type":"Chat","text":"hi"}"#).unwrap(), None);
        assert_eq!(PeerMessage::decode(r#"{"address":"0x00"}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_known_messages_are_errors() {
        let err = PeerMessage::decode(r#"{"_type":"Player1Choice","choice":0}"#).unwrap_err();
        assert!(matches!(err, RpslsError::InvalidMove(0)));

        assert!(PeerMessage::decode(r#"{"_type":"Player1Choice","choice":9}"#).is_err());
        assert!(PeerMessage::decode(r#"{"_type":"ContractAddress","address":"nope"}"#).is_err());
        assert!(PeerMessage::decode(r#"{"_type":"Winner","player":"Nobody"}"#).is_err());
    }
}
