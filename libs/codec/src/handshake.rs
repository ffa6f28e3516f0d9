//! Handshake reply payloads
//!
//! The master's `ConnectGroupOk` payload depends on the negotiated protocol:
//!
//! ```text
//! 1.0   STATUS_GROUP,IMPORT_GROUP,PICK
//!
//! 1.1   Group: STATUS_GROUP,IMPORT_GROUP,PICK
//!       Schema-Version: 0.11
//!       Server-Version: Jakarta 2020.330
//! ```
//!
//! Under 1.1 unrecognized lines are skipped, and a malformed schema version is
//! logged and ignored. Under 1.0 there is no schema negotiation.

use tracing::{info, warn};
use types::{ProtocolVersion, SchemaVersion, IMPORT_GROUP, STATUS_GROUP};

pub const HEADER_GROUP_TAG: &str = "Group";
pub const HEADER_SCHEMA_VERSION_TAG: &str = "Schema-Version";
pub const HEADER_SERVER_VERSION_TAG: &str = "Server-Version";

/// Parsed `ConnectGroupOk` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeReply {
    /// Advertised groups in server order.
    pub groups: Vec<String>,
    /// `None` when the master did not announce one (or announced garbage).
    pub schema_version: Option<SchemaVersion>,
    /// Informational only.
    pub server_version: Option<String>,
}

/// Split a comma separated group list, dropping blanks.
pub fn parse_group_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_reply(version: ProtocolVersion, payload: &[u8]) -> HandshakeReply {
    let text = String::from_utf8_lossy(payload);
    match version {
        ProtocolVersion::V1_0 => HandshakeReply {
            groups: parse_group_list(&text),
            ..HandshakeReply::default()
        },
        ProtocolVersion::V1_1 => parse_headers(&text),
    }
}

fn parse_headers(text: &str) -> HandshakeReply {
    let mut reply = HandshakeReply::default();

    for line in text.lines() {
        let Some((tag, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match tag.trim() {
            HEADER_GROUP_TAG => reply.groups = parse_group_list(value),
            HEADER_SCHEMA_VERSION_TAG => match value.parse::<SchemaVersion>() {
                Ok(version) => reply.schema_version = Some(version),
                Err(e) => warn!(value = %value, error = %e, "Invalid Schema-Version content"),
            },
            HEADER_SERVER_VERSION_TAG => {
                info!(server_version = %value, "Server version");
                reply.server_version = Some(value.to_string());
            }
            _ => {}
        }
    }

    reply
}

/// Render a `ConnectGroupOk` payload. Used by masters and test doubles.
pub fn render_reply(
    version: ProtocolVersion,
    groups: &[String],
    schema_version: Option<SchemaVersion>,
    server_version: Option<&str>,
) -> Vec<u8> {
    let list = groups.join(",");
    let text = match version {
        ProtocolVersion::V1_0 => list,
        ProtocolVersion::V1_1 => {
            let mut text = format!("{HEADER_GROUP_TAG}: {list}\n");
            if let Some(schema) = schema_version {
                text.push_str(&format!("{HEADER_SCHEMA_VERSION_TAG}: {schema}\n"));
            }
            if let Some(server) = server_version {
                text.push_str(&format!("{HEADER_SERVER_VERSION_TAG}: {server}\n"));
            }
            text
        }
    };
    text.into_bytes()
}

/// Make sure the import and status groups are advertised.
///
/// Missing ones are inserted at the front, import first, so a list lacking
/// both ends up as `[STATUS_GROUP, IMPORT_GROUP, ...]`.
pub fn ensure_default_groups(groups: &mut Vec<String>) {
    for default in [IMPORT_GROUP, STATUS_GROUP] {
        if !groups.iter().any(|g| g == default) {
            groups.insert(0, default.to_string());
        }
    }
}
