//! Engine.IO v3 / Socket.IO v2 text packets.
//!
//! Every websocket text frame carries one Engine.IO packet: a single digit
//! packet type followed by its data. Engine.IO `message` packets (type `4`)
//! in turn carry a Socket.IO packet, again prefixed by a single digit.
//!
//! ```text
//! 0{"sid":"abc","pingInterval":25000,"pingTimeout":5000}   open
//! 2                                                        ping
//! 3                                                        pong
//! 40                                                       connect
//! 42["pushState",{"status":"play"}]                        event
//! ```
//!
//! Only the default namespace and text packets are supported; binary
//! attachments are never sent by the playback service.

use std::{fmt, str::FromStr, time::Duration};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Ping interval to use when the server does not announce one.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Session parameters sent by the server in the `open` packet.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: Option<u64>,
    #[serde(default)]
    pub ping_timeout: Option<u64>,
}

impl Handshake {
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
            .filter(|millis| *millis > 0)
            .map_or(DEFAULT_PING_INTERVAL, Duration::from_millis)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// Engine.IO session opened.
    Open(Handshake),
    /// Engine.IO session closed by the peer.
    Close,
    Ping(String),
    Pong(String),
    /// Socket.IO namespace connected.
    Connect,
    /// Socket.IO namespace disconnected.
    Disconnect,
    /// A named event with its arguments.
    Event { name: String, args: Vec<Value> },
    /// Socket.IO error packet.
    Error(String),
    /// Engine.IO `upgrade` / `noop` and Socket.IO acknowledgements, which
    /// carry nothing of interest to this client.
    Noop,
}

impl Packet {
    /// Creates an event packet with an optional single argument.
    #[must_use]
    pub fn event(name: &str, payload: Option<Value>) -> Self {
        Self::Event {
            name: name.to_owned(),
            args: payload.into_iter().collect(),
        }
    }
}

impl FromStr for Packet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::invalid_argument("empty packet"))?;
        let data = chars.as_str();

        match kind {
            '0' => super::json::<Handshake>(data, "handshake").map(Self::Open),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data.to_owned())),
            '3' => Ok(Self::Pong(data.to_owned())),
            '4' => parse_message(data),
            '5' | '6' => Ok(Self::Noop),
            other => Err(Error::invalid_argument(format!(
                "unknown engine.io packet type {other}"
            ))),
        }
    }
}

fn parse_message(data: &str) -> Result<Packet> {
    let mut chars = data.chars();
    let kind = chars
        .next()
        .ok_or_else(|| Error::invalid_argument("empty socket.io packet"))?;
    let data = chars.as_str();

    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => parse_event(data),
        '3' | '5' | '6' => Ok(Packet::Noop),
        '4' => Ok(Packet::Error(data.to_owned())),
        other => Err(Error::invalid_argument(format!(
            "unknown socket.io packet type {other}"
        ))),
    }
}

fn parse_event(data: &str) -> Result<Packet> {
    if data.starts_with('/') {
        return Err(Error::unimplemented(format!(
            "namespaced events are unsupported: {data}"
        )));
    }

    // An acknowledgement id may precede the arguments.
    let data = data.trim_start_matches(|c: char| c.is_ascii_digit());

    let mut args = match serde_json::from_str::<Value>(data)? {
        Value::Array(args) => args,
        other => {
            return Err(Error::invalid_argument(format!(
                "event is not an array: {other}"
            )))
        }
    };

    if args.is_empty() {
        return Err(Error::invalid_argument("event has no name"));
    }

    match args.remove(0) {
        Value::String(name) => Ok(Packet::Event { name, args }),
        other => Err(Error::invalid_argument(format!(
            "event name is not a string: {other}"
        ))),
    }
}

/// Encodes the packet as websocket text.
impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(handshake) => write!(f, "0{{\"sid\":{}}}", Value::from(handshake.sid.as_str())),
            Self::Close => write!(f, "1"),
            Self::Ping(data) => write!(f, "2{data}"),
            Self::Pong(data) => write!(f, "3{data}"),
            Self::Connect => write!(f, "40"),
            Self::Disconnect => write!(f, "41"),
            Self::Event { name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::from(name.as_str()));
                array.extend(args.iter().cloned());
                write!(f, "42{}", Value::Array(array))
            }
            Self::Error(data) => write!(f, "44{data}"),
            Self::Noop => write!(f, "6"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_handshake() {
        let packet: Packet =
            r#"0{"sid":"x1","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#
                .parse()
                .unwrap();

        let Packet::Open(handshake) = packet else {
            panic!("expected open packet, got {packet:?}");
        };
        assert_eq!(handshake.sid, "x1");
        assert_eq!(handshake.ping_interval(), Duration::from_secs(25));
    }

    #[test]
    fn handshake_without_interval_uses_default() {
        let packet: Packet = r#"0{"sid":"x1"}"#.parse().unwrap();
        let Packet::Open(handshake) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.ping_interval(), DEFAULT_PING_INTERVAL);
    }

    #[test]
    fn parses_control_packets() {
        assert_eq!("2".parse::<Packet>().unwrap(), Packet::Ping(String::new()));
        assert_eq!("3probe".parse::<Packet>().unwrap(), Packet::Pong("probe".into()));
        assert_eq!("40".parse::<Packet>().unwrap(), Packet::Connect);
        assert_eq!("41".parse::<Packet>().unwrap(), Packet::Disconnect);
        assert_eq!("1".parse::<Packet>().unwrap(), Packet::Close);
        assert_eq!("6".parse::<Packet>().unwrap(), Packet::Noop);
    }

    #[test]
    fn parses_push_state_event() {
        let packet: Packet = r#"42["pushState",{"status":"play","seek":1200,"duration":180}]"#
            .parse()
            .unwrap();

        assert_eq!(
            packet,
            Packet::Event {
                name: "pushState".into(),
                args: vec![json!({"status": "play", "seek": 1200, "duration": 180})],
            }
        );
    }

    #[test]
    fn skips_acknowledgement_id() {
        let packet: Packet = r#"4212["pushQueue",[]]"#.parse().unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                name: "pushQueue".into(),
                args: vec![json!([])],
            }
        );
    }

    #[test]
    fn rejects_malformed_events() {
        assert!("".parse::<Packet>().is_err());
        assert!("9".parse::<Packet>().is_err());
        assert!("42{}".parse::<Packet>().is_err());
        assert!("42[]".parse::<Packet>().is_err());
        assert!("42[1]".parse::<Packet>().is_err());
        assert!("42/admin,[\"x\"]".parse::<Packet>().is_err());
    }

    #[test]
    fn encodes_events() {
        let packet = Packet::event(
            "replaceAndPlay",
            Some(json!({"service": "mpd", "uri": "mnt/USB/album"})),
        );
        let text = packet.to_string();
        assert!(text.starts_with(r#"42["replaceAndPlay",{"#));
        assert_eq!(text.parse::<Packet>().unwrap(), packet);

        assert_eq!(Packet::event("pause", None).to_string(), r#"42["pause"]"#);
        assert_eq!(Packet::event("seek", Some(json!(42))).to_string(), r#"42["seek",42]"#);
        assert_eq!(Packet::Ping(String::new()).to_string(), "2");
    }
}
