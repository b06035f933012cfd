//! Service property maps and the framework-managed keys inside them.

use std::collections::HashMap;

use serde_json::Value;

/// String-keyed property map attached to every registered service.
pub type Properties = HashMap<String, Value>;

/// Normalized list of capability names the service was registered under.
pub const OBJECT_CLASS: &str = "object_class";
/// Process-wide unique id assigned at registration time.
pub const SERVICE_ID: &str = "service_id";
/// Id of the bundle that registered the service.
pub const OWNING_BUNDLE_ID: &str = "owning_bundle_id";
/// Numeric ranking used to order references; higher wins.
pub const SERVICE_PRIORITY: &str = "priority";

/// Priority assigned when the registering bundle does not supply one.
pub const DEFAULT_PRIORITY: i64 = 50;

/// Keys managed by the framework; stripped from caller-supplied updates.
pub const FORBIDDEN_KEYS: [&str; 3] = [OBJECT_CLASS, SERVICE_ID, OWNING_BUNDLE_ID];

/// Coerce a property value to the string form used by filter comparisons.
/// Strings are taken verbatim (no quotes), everything else renders through
/// its JSON form.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
