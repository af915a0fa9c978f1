use serde_json::Value;

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    CreateRoom {
        name: String,
        wallet_address: Option<String>,
    },
    JoinRoom {
        code: String,
        name: String,
        wallet_address: Option<String>,
    },
    StartGame,
    Move {
        x: f32,
        y: f32,
        elapsed_ms: u64,
    },
    Solve {
        sequence: Vec<u8>,
    },
    Claim,
    Leave,
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "create_room" => {
            let name = object.get("name")?.as_str()?.to_string();
            let wallet_address = parse_optional_string(object.get("walletAddress"))?;
            Some(ParsedClientMessage::CreateRoom {
                name,
                wallet_address,
            })
        }
        "join_room" => {
            let code = object.get("code")?.as_str()?.to_string();
            let name = object.get("name")?.as_str()?.to_string();
            let wallet_address = parse_optional_string(object.get("walletAddress"))?;
            Some(ParsedClientMessage::JoinRoom {
                code,
                name,
                wallet_address,
            })
        }
        "start_game" => Some(ParsedClientMessage::StartGame),
        "move" => {
            let x = parse_finite_f32(object.get("x")?)?;
            let y = parse_finite_f32(object.get("y")?)?;
            let elapsed_ms = parse_elapsed_ms(object.get("elapsedMs")?)?;
            Some(ParsedClientMessage::Move { x, y, elapsed_ms })
        }
        "solve" => {
            let sequence = object
                .get("sequence")?
                .as_array()?
                .iter()
                .map(parse_sequence_digit)
                .collect::<Option<Vec<u8>>>()?;
            Some(ParsedClientMessage::Solve { sequence })
        }
        "claim" => Some(ParsedClientMessage::Claim),
        "leave" => Some(ParsedClientMessage::Leave),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_optional_string(value: Option<&Value>) -> Option<Option<String>> {
    match value {
        None | Some(Value::Null) => Some(None),
        Some(value) => Some(Some(value.as_str()?.to_string())),
    }
}

fn parse_finite_f32(value: &Value) -> Option<f32> {
    let number = value.as_f64()?;
    if !number.is_finite() {
        return None;
    }
    Some(number as f32)
}

fn parse_elapsed_ms(value: &Value) -> Option<u64> {
    if let Some(number) = value.as_u64() {
        return Some(number);
    }
    if let Some(number) = value.as_f64() {
        if number.is_finite() && number >= 0.0 {
            return Some(number.floor() as u64);
        }
    }
    None
}

fn parse_sequence_digit(value: &Value) -> Option<u8> {
    let number = value.as_u64()?;
    u8::try_from(number).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_create_room_message() {
        let parsed =
            parse_client_message(r#"{"type":"create_room","name":"A","walletAddress":"0xabc"}"#)
                .expect("create_room should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::CreateRoom {
                name: "A".to_string(),
                wallet_address: Some("0xabc".to_string()),
            }
        );
    }

    #[test]
    fn create_room_without_wallet_becomes_guest() {
        let parsed = parse_client_message(r#"{"type":"create_room","name":"A"}"#)
            .expect("create_room should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::CreateRoom {
                name: "A".to_string(),
                wallet_address: None,
            }
        );

        let parsed = parse_client_message(r#"{"type":"create_room","name":"A","walletAddress":null}"#)
            .expect("null wallet should parse");
        assert!(matches!(
            parsed,
            ParsedClientMessage::CreateRoom {
                wallet_address: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_join_room_message() {
        let parsed = parse_client_message(r#"{"type":"join_room","code":"ABC123","name":"B"}"#)
            .expect("join_room should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::JoinRoom {
                code: "ABC123".to_string(),
                name: "B".to_string(),
                wallet_address: None,
            }
        );
    }

    #[test]
    fn parse_move_message() {
        let parsed = parse_client_message(r#"{"type":"move","x":105,"y":100.5,"elapsedMs":250}"#)
            .expect("move should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::Move {
                x: 105.0,
                y: 100.5,
                elapsed_ms: 250,
            }
        );
    }

    #[test]
    fn move_rejects_non_finite_coordinates() {
        assert!(parse_client_message(r#"{"type":"move","x":1e999,"y":0,"elapsedMs":0}"#).is_none());
        assert!(parse_client_message(r#"{"type":"move","x":"a","y":0,"elapsedMs":0}"#).is_none());
        assert!(parse_client_message(r#"{"type":"move","x":0,"y":0,"elapsedMs":-5}"#).is_none());
    }

    #[test]
    fn parse_solve_message() {
        let parsed = parse_client_message(r#"{"type":"solve","sequence":[1,3,2,4]}"#)
            .expect("solve should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::Solve {
                sequence: vec![1, 3, 2, 4],
            }
        );
    }

    #[test]
    fn solve_rejects_non_numeric_sequences() {
        assert!(parse_client_message(r#"{"type":"solve","sequence":[1,"x",2,4]}"#).is_none());
        assert!(parse_client_message(r#"{"type":"solve","sequence":[1,-2,3,4]}"#).is_none());
    }

    #[test]
    fn parse_bare_control_messages() {
        assert_eq!(
            parse_client_message(r#"{"type":"start_game"}"#),
            Some(ParsedClientMessage::StartGame)
        );
        assert_eq!(
            parse_client_message(r#"{"type":"claim"}"#),
            Some(ParsedClientMessage::Claim)
        );
        assert_eq!(
            parse_client_message(r#"{"type":"leave"}"#),
            Some(ParsedClientMessage::Leave)
        );
    }

    #[test]
    fn parse_ping_requires_finite_number() {
        assert!(matches!(
            parse_client_message(r#"{"type":"ping","t":12.5}"#),
            Some(ParsedClientMessage::Ping { .. })
        ));
        assert!(parse_client_message(r#"{"type":"ping","t":"later"}"#).is_none());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(parse_client_message(r#"{"type":"teleport"}"#).is_none());
        assert!(parse_client_message("not json").is_none());
    }
}
