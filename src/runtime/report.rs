//! Plain-text reports for broadcast changes, shared by the log and the
//! command replies.

pub const CHANGE_TITLE_SET: &str = "Broadcast set:";
pub const CHANGE_TITLE_CANCEL: &str = "Broadcast cancelled:";
pub const BAD_OPTIONS_TITLE: &str = "No broadcast to cancel/clear for these options:";
pub const BAD_OPTIONS_TITLE_SET: &str =
    "Rejected broadcast: settings are not compatible with the workflow";

pub const CHANGE_PREFIX_SET: &str = "+";
pub const CHANGE_PREFIX_CANCEL: &str = "-";

/// One applied or removed setting, ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastChange {
    pub point: String,
    pub namespace: String,
    /// Compact bracket form, e.g. `[env]X`.
    pub key: String,
    pub value: String,
}

/// An option value that matched nothing, echoed back under its CLI flag.
#[derive(Debug, Clone, PartialEq)]
pub struct BadOption {
    /// Internal option name: `point_strings`, `namespaces` or `settings`.
    pub opt: &'static str,
    pub value: String,
}

fn cli_flag(opt: &str) -> &str {
    match opt {
        "point_strings" => "point",
        "namespaces" => "namespace",
        "settings" => "set",
        other => other,
    }
}

/// `Broadcast set:` / `Broadcast cancelled:` followed by one line per
/// change, sorted by (point, namespace). Empty input renders nothing.
pub fn get_broadcast_change_report(changes: &[BroadcastChange], is_cancel: bool) -> String {
    if changes.is_empty() {
        return String::new();
    }
    let mut sorted: Vec<&BroadcastChange> = changes.iter().collect();
    sorted.sort_by(|a, b| (&a.point, &a.namespace).cmp(&(&b.point, &b.namespace)));

    let prefix = if is_cancel {
        CHANGE_PREFIX_CANCEL
    } else {
        CHANGE_PREFIX_SET
    };
    let mut msg = String::from(if is_cancel {
        CHANGE_TITLE_CANCEL
    } else {
        CHANGE_TITLE_SET
    });
    for change in sorted {
        msg.push_str(&format!(
            "\n{} [{}/{}] {}={}",
            prefix, change.point, change.namespace, change.key, change.value
        ));
    }
    msg
}

/// The rejection block for a set, or the miss block for a cancel/clear.
/// Empty input renders nothing.
pub fn get_broadcast_bad_options_report(bad_options: &[BadOption], is_set: bool) -> String {
    if bad_options.is_empty() {
        return String::new();
    }
    let mut msg = String::from(if is_set {
        BAD_OPTIONS_TITLE_SET
    } else {
        BAD_OPTIONS_TITLE
    });
    for bad in bad_options {
        msg.push_str(&format!("\n  --{}={}", cli_flag(bad.opt), bad.value));
    }
    msg
}
