//! obs-websocket v5 message shapes used by the remote level client.
//!
//! Every frame is `{"op": <int>, "d": {...}}`. Only the five opcodes below are
//! interpreted; anything else parses to [`ServerMessage::Other`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::AcquisitionError;

pub const OP_HELLO: u8 = 0;
pub const OP_IDENTIFY: u8 = 1;
pub const OP_IDENTIFIED: u8 = 2;
pub const OP_REQUEST: u8 = 6;
pub const OP_RESPONSE: u8 = 7;

/// RPC version announced in identify.
pub const RPC_VERSION: u32 = 1;

pub const GET_INPUT_VOLUME: &str = "GetInputVolume";

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RequestStatus {
    pub result: bool,
    #[serde(default)]
    pub code: u32,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputVolume {
    pub input_volume_mul: f64,
    #[serde(default)]
    pub input_volume_db: Option<f64>,
}

impl Response {
    /// The linear multiplier, if this is a successful `GetInputVolume` reply.
    pub fn input_volume_mul(&self) -> Option<f64> {
        if self.request_type != GET_INPUT_VOLUME || !self.request_status.result {
            return None;
        }
        let data = self.response_data.clone()?;
        serde_json::from_value::<InputVolume>(data)
            .ok()
            .map(|v| v.input_volume_mul)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello(Hello),
    Identified(Identified),
    Response(Response),
    /// An opcode this client does not interpret.
    Other(u8),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, AcquisitionError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| AcquisitionError::ProtocolMismatch(format!("not an envelope: {}", e)))?;
        let shape = |e: serde_json::Error| {
            AcquisitionError::ProtocolMismatch(format!("bad payload for op {}: {}", envelope.op, e))
        };
        match envelope.op {
            OP_HELLO => serde_json::from_value(envelope.d.clone()).map(Self::Hello).map_err(shape),
            OP_IDENTIFIED => serde_json::from_value(envelope.d.clone())
                .map(Self::Identified)
                .map_err(shape),
            OP_RESPONSE => serde_json::from_value(envelope.d.clone())
                .map(Self::Response)
                .map_err(shape),
            other => Ok(Self::Other(other)),
        }
    }
}

/// Identify (op 1). `authentication` is the configured secret, sent verbatim.
pub fn identify(authentication: Option<&str>) -> String {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": 0,
    });
    if let Some(token) = authentication {
        d["authentication"] = Value::String(token.to_string());
    }
    json!({ "op": OP_IDENTIFY, "d": d }).to_string()
}

/// Request (op 6) for the volume of one input.
pub fn get_input_volume(request_id: &str, input_name: &str) -> String {
    json!({
        "op": OP_REQUEST,
        "d": {
            "requestType": GET_INPUT_VOLUME,
            "requestId": request_id,
            "requestData": { "inputName": input_name },
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello_with_and_without_auth() {
        let plain = ServerMessage::parse(
            r#"{"op":0,"d":{"obsWebSocketVersion":"5.5.0","rpcVersion":1}}"#,
        )
        .unwrap();
        match plain {
            ServerMessage::Hello(h) => {
                assert_eq!(h.rpc_version, 1);
                assert!(h.authentication.is_none());
            }
            other => panic!("expected hello, got {:?}", other),
        }

        let secured = ServerMessage::parse(
            r#"{"op":0,"d":{"rpcVersion":1,"authentication":{"challenge":"c","salt":"s"}}}"#,
        )
        .unwrap();
        assert!(matches!(secured, ServerMessage::Hello(Hello { authentication: Some(_), .. })));
    }

    #[test]
    fn extracts_volume_only_from_matching_successful_responses() {
        let ok = r#"{"op":7,"d":{"requestType":"GetInputVolume","requestId":"a",
            "requestStatus":{"result":true,"code":100},
            "responseData":{"inputVolumeMul":0.5,"inputVolumeDb":-6.02}}}"#;
        let ServerMessage::Response(resp) = ServerMessage::parse(ok).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.input_volume_mul(), Some(0.5));

        let wrong_type = r#"{"op":7,"d":{"requestType":"GetVersion","requestId":"b",
            "requestStatus":{"result":true,"code":100},"responseData":{"inputVolumeMul":0.9}}}"#;
        let ServerMessage::Response(resp) = ServerMessage::parse(wrong_type).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.input_volume_mul(), None);

        let failed = r#"{"op":7,"d":{"requestType":"GetInputVolume","requestId":"c",
            "requestStatus":{"result":false,"code":600}}}"#;
        let ServerMessage::Response(resp) = ServerMessage::parse(failed).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.input_volume_mul(), None);
    }

    #[test]
    fn unknown_opcodes_are_not_errors() {
        assert_eq!(
            ServerMessage::parse(r#"{"op":5,"d":{"eventType":"InputVolumeMeters"}}"#).unwrap(),
            ServerMessage::Other(5)
        );
    }

    #[test]
    fn malformed_frames_are_protocol_mismatches() {
        let err = ServerMessage::parse("not json").unwrap_err();
        assert_eq!(err.kind(), "protocol_mismatch");
        let err = ServerMessage::parse(r#"{"op":2,"d":{}}"#).unwrap_err();
        assert_eq!(err.kind(), "protocol_mismatch");
    }

    #[test]
    fn identify_carries_secret_verbatim() {
        let v: Value = serde_json::from_str(&identify(Some("s3cret"))).unwrap();
        assert_eq!(v["op"], 1);
        assert_eq!(v["d"]["rpcVersion"], 1);
        assert_eq!(v["d"]["authentication"], "s3cret");

        let v: Value = serde_json::from_str(&identify(None)).unwrap();
        assert!(v["d"].get("authentication").is_none());
    }

    #[test]
    fn request_names_the_input() {
        let v: Value = serde_json::from_str(&get_input_volume("id-1", "Mic/Aux")).unwrap();
        assert_eq!(v["op"], 6);
        assert_eq!(v["d"]["requestType"], "GetInputVolume");
        assert_eq!(v["d"]["requestId"], "id-1");
        assert_eq!(v["d"]["requestData"]["inputName"], "Mic/Aux");
    }
}
