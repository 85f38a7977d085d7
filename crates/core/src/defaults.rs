// Default value resolution for a single field of a new document.
//
// Precedence, first match wins:
//   1. table fields → empty list
//   2. Link fields → permission default, sole user default for the target
//      doctype, user default by fieldname, remembered last selection
//   3. the static default expression (`__user`, `user_fullname`, `Today`,
//      `now`, `:Doctype` boot lookups, literals)
//   4. Select fields without a default → first option
// Link candidates outside the user's allowed records are skipped.

use chrono::NaiveDateTime;
use docmirror_common::naming::scrub;
use docmirror_common::protocol::boot::AllowedRecords;
use docmirror_common::schema::FieldType;
use docmirror_common::types::is_truthy;
use docmirror_common::{Document, FieldDescriptor};
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::Session;
use crate::store::locals::Locals;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything besides the field and documents that resolution reads.
#[derive(Debug, Clone, Copy)]
pub struct DefaultContext<'a> {
    pub session: &'a Session,
    /// Boot records (`:Doctype`) are looked up here.
    pub locals: &'a Locals,
    /// Title field of the document's doctype; it never takes a static default.
    pub title_field: Option<&'a str>,
    pub now: NaiveDateTime,
}

/// Default for `field` on `doc`, or `None` when nothing applies.
pub fn resolve_default(
    field: &FieldDescriptor,
    doc: &Document,
    parent: Option<&Document>,
    ctx: &DefaultContext<'_>,
) -> Option<Value> {
    if field.fieldtype.is_unknown() {
        warn!(
            doctype = %doc.doctype,
            fieldname = %field.fieldname,
            fieldtype = field.fieldtype.as_str(),
            "unknown field type; no default"
        );
        return None;
    }
    if field.fieldtype.is_table() {
        return Some(Value::Array(Vec::new()));
    }
    if field.fieldtype.is_structural() {
        return None;
    }

    let permissions = LinkPermissions::for_field(field, doc, ctx.session);

    let value = link_default(field, &permissions, ctx.session)
        .or_else(|| static_default(field, doc, parent, &permissions, ctx))
        .or_else(|| select_default(field));

    value.map(|value| cast(&field.fieldtype, value))
}

/// Permission context of a Link field. Links to `User` and fields flagged
/// `ignore_user_permissions` are never restricted.
struct LinkPermissions {
    restricted: bool,
    records: AllowedRecords,
}

impl LinkPermissions {
    fn for_field(field: &FieldDescriptor, doc: &Document, session: &Session) -> Self {
        let target = field.link_target().unwrap_or_default();
        let records = if field.fieldtype == FieldType::Link {
            session.allowed_records(target, &doc.doctype)
        } else {
            AllowedRecords::default()
        };
        let restricted = field.fieldtype == FieldType::Link
            && target != "User"
            && !field.ignore_user_permissions
            && records.is_restricted();
        Self { restricted, records }
    }

    fn permits(&self, value: &str) -> bool {
        !self.restricted || self.records.permits(value)
    }
}

fn link_default(field: &FieldDescriptor, permissions: &LinkPermissions, session: &Session) -> Option<Value> {
    if field.fieldtype != FieldType::Link {
        return None;
    }
    let target = field.link_target()?;
    if target == "User" {
        return None;
    }

    if permissions.restricted {
        if let Some(default_doc) = &permissions.records.default_doc {
            return Some(Value::String(default_doc.clone()));
        }
    }

    let sole_target_default = if field.ignore_user_permissions {
        None
    } else {
        match session.user_defaults(target) {
            [only] => Some(only.as_str()),
            _ => None,
        }
    };
    let candidate = sole_target_default
        .or_else(|| session.user_default(&field.fieldname))
        .or_else(|| {
            if field.remember_last_selected_value {
                session.last_selected(target)
            } else {
                None
            }
        })
        .filter(|candidate| !candidate.is_empty())?;

    if permissions.permits(candidate) {
        Some(Value::String(candidate.to_string()))
    } else {
        debug!(fieldname = %field.fieldname, candidate, "user default not permitted; skipped");
        None
    }
}

fn static_default(
    field: &FieldDescriptor,
    doc: &Document,
    parent: Option<&Document>,
    permissions: &LinkPermissions,
    ctx: &DefaultContext<'_>,
) -> Option<Value> {
    let Some(expression) = field.default.as_deref() else {
        if field.fieldtype == FieldType::Time {
            return Some(Value::String(ctx.now.format(TIME_FORMAT).to_string()));
        }
        return None;
    };

    if expression == "__user" || expression.eq_ignore_ascii_case("user") {
        return Some(Value::String(ctx.session.user.clone()));
    }
    if expression == "user_fullname" {
        return Some(Value::String(ctx.session.fullname().to_string()));
    }
    if expression == "Today" {
        return Some(Value::String(ctx.now.format(DATE_FORMAT).to_string()));
    }
    if expression.eq_ignore_ascii_case("now") {
        let format = if field.fieldtype == FieldType::Time { TIME_FORMAT } else { DATETIME_FORMAT };
        return Some(Value::String(ctx.now.format(format).to_string()));
    }
    if let Some(boot_doctype) = expression.strip_prefix(':') {
        let value = boot_doc_default(field, expression, boot_doctype, parent, ctx)?;
        let permitted = value.as_str().map_or(true, |text| permissions.permits(text));
        return permitted.then_some(value);
    }
    if ctx.title_field == Some(field.fieldname.as_str()) {
        debug!(doctype = %doc.doctype, fieldname = %field.fieldname, "title field ignores static default");
        return None;
    }

    let link_checked = field.fieldtype == FieldType::Link && field.link_target() != Some("User");
    if link_checked && !permissions.permits(expression) {
        debug!(fieldname = %field.fieldname, expression, "static default not permitted; skipped");
        return None;
    }
    Some(Value::String(expression.to_string()))
}

/// `:Company` style defaults: find the referenced boot record through the
/// parent's `company` field (or the user's `company` default for top-level
/// docs) and read the same fieldname from it.
fn boot_doc_default(
    field: &FieldDescriptor,
    boot_key: &str,
    boot_doctype: &str,
    parent: Option<&Document>,
    ctx: &DefaultContext<'_>,
) -> Option<Value> {
    let ref_fieldname = scrub(boot_doctype);
    let ref_value = match parent {
        Some(parent) => parent.get_str(&ref_fieldname)?.to_string(),
        None => ctx.session.user_default(&ref_fieldname)?.to_string(),
    };
    let boot_doc = ctx.locals.get_by(boot_key, &ref_value)?;
    boot_doc.get(&field.fieldname).filter(|value| is_truthy(value)).cloned()
}

fn select_default(field: &FieldDescriptor) -> Option<Value> {
    if field.fieldtype != FieldType::Select || field.default.is_some() {
        return None;
    }
    field.select_options().first().map(|option| Value::String((*option).to_string()))
}

/// Coerce numeric field types: `Int`/`Check` to integers, `Float`/
/// `Currency`/`Percent` to floats. Unparseable text becomes zero.
pub fn cast(fieldtype: &FieldType, value: Value) -> Value {
    match fieldtype {
        FieldType::Int | FieldType::Check => Value::from(to_f64(&value).trunc() as i64),
        FieldType::Float | FieldType::Currency | FieldType::Percent => Value::from(to_f64(&value)),
        _ => value,
    }
}

fn to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or_default(),
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::String(text) => text.trim().replace(',', "").parse().unwrap_or_default(),
        _ => 0.0,
    }
}
