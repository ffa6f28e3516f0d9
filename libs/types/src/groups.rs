//! Reserved group names
//!
//! Groups are plain strings on the wire. A handful of names carry protocol
//! meaning and are checked by the connection before anything reaches the
//! transport.

/// Control channel used for the handshake and administrative commands.
/// Never a regular subscription or send destination.
pub const MASTER_GROUP: &str = "MASTER_GROUP";

/// Subscribed by default; always present in the advertised group list.
pub const IMPORT_GROUP: &str = "IMPORT_GROUP";

/// Subscribed by default; always present in the advertised group list and
/// always usable even if the master does not advertise it.
pub const STATUS_GROUP: &str = "STATUS_GROUP";

/// Administrative channel. Always known, but only peers whose own peer group
/// is `ADMIN_GROUP` may publish to it.
pub const ADMIN_GROUP: &str = "ADMIN_GROUP";

/// Listener-only channel. Never a valid send destination.
pub const LISTENER_GROUP: &str = "LISTENER_GROUP";

/// Client name the master registers with on the transport.
pub const MASTER_CLIENT_NAME: &str = "MASTER";

/// Groups that are accepted for subscribe/send even when the master did not
/// advertise them.
pub fn is_builtin_group(group: &str) -> bool {
    group == STATUS_GROUP || group == ADMIN_GROUP
}

/// Split a private group of the form `#<client>#<host>` into its client name
/// and host parts.
///
/// Strings without separators are treated as a bare client name.
pub fn split_private_group(private_group: &str) -> (&str, &str) {
    let tokens: Vec<&str> = private_group.split('#').filter(|t| !t.is_empty()).collect();
    match tokens.as_slice() {
        [] => ("", ""),
        [client] => (*client, ""),
        [client, .., host] => (*client, *host),
    }
}
